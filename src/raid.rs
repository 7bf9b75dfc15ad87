//! The RAID codec (`raid_gen`, `raid_rec`, `raid_zero`): referenced only by
//! contract, but given a concrete GF(2^8) implementation here so the engine
//! can actually be exercised. Level 0 is plain XOR (the degenerate `x^0` row
//! of the Vandermonde matrix below); levels 1..5 use distinct powers of each
//! disk's Galois-field coordinate, the classic Reed–Solomon erasure
//! scheme. The GF multiplication primitive (shift, test the carried-out
//! high bit, reduce by the field polynomial) follows the same technique
//! used by RAID-Z style codecs such as guardzfs's `raidz.rs`.

use thiserror::Error;

/// GF(2^8) reduction polynomial (x^8 + x^4 + x^3 + x^2 + 1, low byte 0x1D),
/// the same one used by RAID-6/RAID-Z-style Galois field codecs.
const GF_POLY: u8 = 0x1D;

/// Disks beyond this many can't be assigned distinct nonzero GF(2^8)
/// coordinates simultaneously with up to 6 parity rows.
pub const MAX_DISKS: usize = 255;

/// Up to six parity levels (P, Q, R, S, T, U).
pub const MAX_LEVEL: usize = 6;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum RaidError {
    #[error("too many simultaneous failures: {failed} > level {level}")]
    TooManyFailures { failed: usize, level: usize },
    #[error("disk array too large for the codec: {diskmax} > {MAX_DISKS}")]
    TooManyDisks { diskmax: usize },
}

fn gf_mul(mut a: u8, mut b: u8) -> u8
{
    let mut result = 0u8;

    for _ in 0..8 {
        if b & 1 != 0 {
            result ^= a;
        }

        let high_bit = a & 0x80;
        a <<= 1;
        if high_bit != 0 {
            a ^= GF_POLY;
        }

        b >>= 1;
    }

    result
}

struct GfTables {
    exp: [u8; 256],
    log: [u8; 256],
}

fn gf_tables() -> &'static GfTables
{
    use std::sync::OnceLock;
    static TABLES: OnceLock<GfTables> = OnceLock::new();

    TABLES.get_or_init(|| {
        let mut exp = [0u8; 256];
        let mut log = [0u8; 256];

        let mut x = 1u8;
        for i in 0..255usize {
            exp[i] = x;
            log[x as usize] = i as u8;
            x = gf_mul(x, 2);
        }
        exp[255] = exp[0];

        GfTables { exp, log }
    })
}

fn gf_pow(base: u8, mut exp: u32) -> u8
{
    if base == 0 {
        return if exp == 0 { 1 } else { 0 };
    }

    let t = gf_tables();
    exp %= 255;
    let l = (t.log[base as usize] as u32 * exp) % 255;
    t.exp[l as usize]
}

fn gf_inv(a: u8) -> u8
{
    debug_assert!(a != 0);
    let t = gf_tables();
    let l = (255 - t.log[a as usize] as u32) % 255;
    t.exp[l as usize]
}

fn gf_mul_fast(a: u8, b: u8) -> u8
{
    if a == 0 || b == 0 {
        return 0;
    }
    let t = gf_tables();
    let l = (t.log[a as usize] as u32 + t.log[b as usize] as u32) % 255;
    t.exp[l as usize]
}

/// Disk `j`'s GF(2^8) coordinate: distinct, nonzero, 1-indexed.
fn disk_coord(j: usize) -> u8
{
    (j + 1) as u8
}

/// `raid_zero(buf)`: zero-fills a buffer, used to prime the codec's view
/// of a disk slot with no block at this index.
pub fn raid_zero(buf: &mut [u8])
{
    buf.fill(0);
}

/// `raid_gen(diskmax, level, block_size, buf)`: fills `buf[diskmax..diskmax
/// + level]` from `buf[0..diskmax]`.
pub fn raid_gen(diskmax: usize, level: usize, buf: &mut [Vec<u8>]) -> Result<(), RaidError>
{
    if diskmax > MAX_DISKS {
        return Err(RaidError::TooManyDisks { diskmax });
    }
    debug_assert!(buf.len() >= diskmax + level);
    debug_assert!(level <= MAX_LEVEL);

    let block_size = buf[0].len();

    for l in 0..level {
        for t in 0..block_size {
            let mut acc = 0u8;
            for j in 0..diskmax {
                let coeff = gf_pow(disk_coord(j), l as u32);
                acc ^= gf_mul_fast(buf[j][t], coeff);
            }
            buf[diskmax + l][t] = acc;
        }
    }

    Ok(())
}

/// `raid_rec(failed_mac, failed_map, diskmax, level, block_size, buf)`:
/// reconstructs the data buffers named in `failed` (disk indices) from the
/// `level` parity rows already present in `buf[diskmax..diskmax+level]` and
/// the surviving data buffers. Errors if more positions are failed than
/// there are parity rows to recover them.
pub fn raid_rec(failed: &[usize], diskmax: usize, level: usize, buf: &mut [Vec<u8>]) -> Result<(), RaidError>
{
    if failed.len() > level {
        return Err(RaidError::TooManyFailures { failed: failed.len(), level });
    }
    if diskmax > MAX_DISKS {
        return Err(RaidError::TooManyDisks { diskmax });
    }
    if failed.is_empty() {
        return Ok(());
    }

    let k = failed.len();
    let block_size = buf[0].len();

    // M[row][col] = coord(failed[col])^row, for row in 0..k.
    let mut m = vec![vec![0u8; k]; k];
    for row in 0..k {
        for col in 0..k {
            m[row][col] = gf_pow(disk_coord(failed[col]), row as u32);
        }
    }
    let minv = gf_invert_matrix(&m)?;

    // syndrome[row][t] = parity_row[row][t] XOR sum over surviving disks.
    let mut syndrome = vec![vec![0u8; block_size]; k];
    for row in 0..k {
        for t in 0..block_size {
            syndrome[row][t] = buf[diskmax + row][t];
        }
        for j in 0..diskmax {
            if failed.contains(&j) {
                continue;
            }
            let coeff = gf_pow(disk_coord(j), row as u32);
            if coeff == 0 {
                continue;
            }
            for t in 0..block_size {
                syndrome[row][t] ^= gf_mul_fast(buf[j][t], coeff);
            }
        }
    }

    for (col, &disk) in failed.iter().enumerate() {
        for t in 0..block_size {
            let mut acc = 0u8;
            for row in 0..k {
                acc ^= gf_mul_fast(minv[col][row], syndrome[row][t]);
            }
            buf[disk][t] = acc;
        }
    }

    Ok(())
}

/// Gauss-Jordan inversion of a `k x k` GF(2^8) matrix. The matrix is a
/// sub-Vandermonde matrix built from distinct nonzero coordinates, which is
/// always invertible; a zero pivot here would indicate a programming
/// error (duplicate coordinates), not a data condition, so it is reported
/// as the same "too many failures" style error rather than panicking.
fn gf_invert_matrix(m: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, RaidError>
{
    let k = m.len();
    let mut a: Vec<Vec<u8>> = m.to_vec();
    let mut inv = vec![vec![0u8; k]; k];
    for i in 0..k {
        inv[i][i] = 1;
    }

    for col in 0..k {
        let pivot_row = (col..k).find(|&r| a[r][col] != 0).ok_or(RaidError::TooManyFailures {
            failed: k,
            level: k.saturating_sub(1),
        })?;
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let inv_pivot = gf_inv(a[col][col]);
        for c in 0..k {
            a[col][c] = gf_mul_fast(a[col][c], inv_pivot);
            inv[col][c] = gf_mul_fast(inv[col][c], inv_pivot);
        }

        for r in 0..k {
            if r == col || a[r][col] == 0 {
                continue;
            }
            let factor = a[r][col];
            for c in 0..k {
                a[r][c] ^= gf_mul_fast(factor, a[col][c]);
                inv[r][c] ^= gf_mul_fast(factor, inv[col][c]);
            }
        }
    }

    Ok(inv)
}
