use crate::frame::{CardValue, RawFrame};
use anyhow::{Context, Result};
use fitrs::{Fits, FitsData, FitsDataArray, Hdu, HeaderValue};
use regex::Regex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

/// Load the primary HDU of a FITS file as raw pixels plus the requested
/// header cards. Cards absent from the header are simply not present in
/// the returned metadata.
pub fn load_raw_frame(path: &Path, cards: &[&str]) -> Result<RawFrame> {
    check_primary_size(path)?;

    let fits = Fits::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

    let hdu = fits
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No primary HDU found in FITS file"))?;

    let naxis = integer_card(&hdu, "NAXIS")?;
    // FITS lists the fastest axis first; frames want row-major order
    let mut shape = (1..=naxis)
        .map(|i| integer_card(&hdu, &format!("NAXIS{}", i)))
        .collect::<Result<Vec<_>>>()?;
    shape.reverse();

    let bzero = real_card(&hdu, "BZERO").unwrap_or(0.0);
    let bscale = real_card(&hdu, "BSCALE").unwrap_or(1.0);
    let scale = |raw: f64| bzero + bscale * raw;

    // Blank integer pixels become NaN so statistics treat them as bad pixels
    let data: Vec<f64> = match hdu.read_data() {
        FitsData::Characters(_) => {
            return Err(anyhow::anyhow!(
                "FITS file contains character data, not image data"
            ));
        }
        FitsData::IntegersI32(FitsDataArray { data, .. }) => data
            .iter()
            .map(|v| match *v {
                Some(raw) => scale(f64::from(raw)),
                None => f64::NAN,
            })
            .collect(),
        // fitrs has already applied the unsigned offset for this variant
        FitsData::IntegersU32(FitsDataArray { data, .. }) => data
            .iter()
            .map(|v| match *v {
                Some(raw) => f64::from(raw),
                None => f64::NAN,
            })
            .collect(),
        FitsData::FloatingPoint32(FitsDataArray { data, .. }) => {
            data.iter().map(|&v| scale(f64::from(v))).collect()
        }
        FitsData::FloatingPoint64(FitsDataArray { data, .. }) => {
            data.iter().map(|&v| scale(v)).collect()
        }
    };

    let metadata = cards
        .iter()
        .filter_map(|&key| {
            hdu.value(key)
                .and_then(card_value)
                .map(|value| (key.to_string(), value))
        })
        .collect::<HashMap<_, _>>();

    Ok(RawFrame {
        shape,
        data,
        metadata,
    })
}

/// Make sure the file holds the whole primary data unit its header
/// declares. fitrs panics on short reads, so partly written frames have to
/// be caught here.
fn check_primary_size(path: &Path) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
    let file_len = file.metadata()?.len();

    let mut sizes: HashMap<String, i64> = HashMap::new();
    let mut header_len = 0u64;
    let mut block = vec![0u8; BLOCK_SIZE];
    'blocks: loop {
        file.read_exact(&mut block)
            .with_context(|| format!("FITS header ends before END card: {}", path.display()))?;
        header_len += BLOCK_SIZE as u64;

        for card in block.chunks(CARD_SIZE) {
            let card = String::from_utf8_lossy(card);
            let key = card.get(..8).unwrap_or_default().trim_end();
            if key == "END" {
                break 'blocks;
            }
            if key == "BITPIX" || key.starts_with("NAXIS") {
                let value = card
                    .get(10..)
                    .and_then(|v| v.split('/').next())
                    .and_then(|v| v.trim().parse::<i64>().ok());
                if let Some(value) = value {
                    sizes.insert(key.to_string(), value);
                }
            }
        }
    }

    let bitpix = sizes
        .get("BITPIX")
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Missing BITPIX header"))?;
    let naxis = sizes.get("NAXIS").copied().unwrap_or(0);
    let mut data_len = if naxis > 0 { bitpix.unsigned_abs() / 8 } else { 0 };
    for i in 1..=naxis {
        let n = sizes
            .get(&format!("NAXIS{}", i))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Missing NAXIS{} header", i))?;
        data_len = data_len.saturating_mul(n.max(0) as u64);
    }

    let available = file_len.saturating_sub(header_len);
    if available < data_len {
        return Err(anyhow::anyhow!(
            "Truncated FITS file {}: header declares {} data bytes, found {}",
            path.display(),
            data_len,
            available
        ));
    }
    Ok(())
}

fn card_value(value: &HeaderValue) -> Option<CardValue> {
    match value {
        HeaderValue::IntegerNumber(n) => Some(CardValue::Integer(*n as i64)),
        HeaderValue::RealFloatingNumber(f) => Some(CardValue::Real(*f)),
        HeaderValue::CharacterString(s) => Some(CardValue::Text(s.trim().to_string())),
        HeaderValue::Logical(b) => Some(CardValue::Logical(*b)),
        _ => None,
    }
}

fn integer_card(hdu: &Hdu, key: &str) -> Result<usize> {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(n)) if *n >= 0 => Ok(*n as usize),
        Some(_) => Err(anyhow::anyhow!("{} is not a non-negative integer", key)),
        None => Err(anyhow::anyhow!("Missing {} header", key)),
    }
}

fn real_card(hdu: &Hdu, key: &str) -> Option<f64> {
    match hdu.value(key)? {
        HeaderValue::IntegerNumber(n) => Some(*n as f64),
        HeaderValue::RealFloatingNumber(f) => Some(*f),
        _ => None,
    }
}

pub fn is_fits_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            ext_lower == "fits" || ext_lower == "fit" || ext_lower == "fts"
        })
        .unwrap_or(false)
}

/// Collect FITS files under `dir`, optionally filtering file names with
/// `pattern`.
pub fn find_fits_files(
    dir: &Path,
    recursive: bool,
    pattern: Option<&Regex>,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();

        if path.is_dir() {
            if recursive {
                find_fits_files(&path, recursive, pattern, files)?;
            }
        } else if is_fits_file(&path) && matches_pattern(&path, pattern) {
            files.push(path);
        }
    }

    Ok(())
}

fn matches_pattern(path: &Path, pattern: Option<&Regex>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| pattern.is_match(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fits_file() {
        assert!(is_fits_file(Path::new("/data/allsky_0001.fits")));
        assert!(is_fits_file(Path::new("frame.FIT")));
        assert!(is_fits_file(Path::new("frame.fts")));
        assert!(!is_fits_file(Path::new("frame.fits.gz")));
        assert!(!is_fits_file(Path::new("notes.txt")));
        assert!(!is_fits_file(Path::new("no_extension")));
    }

    #[test]
    fn test_matches_pattern() {
        let pattern = Regex::new(r"^allsky_\d{4}").unwrap();
        assert!(matches_pattern(Path::new("/x/allsky_0001.fits"), Some(&pattern)));
        assert!(!matches_pattern(Path::new("/x/dark_0001.fits"), Some(&pattern)));
        assert!(matches_pattern(Path::new("/x/dark_0001.fits"), None));
    }

    #[test]
    fn test_find_fits_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("night2");
        fs::create_dir(&nested).unwrap();
        for name in ["a.fits", "b.fit", "readme.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::write(nested.join("c.fits"), b"").unwrap();

        let mut flat = Vec::new();
        find_fits_files(dir.path(), false, None, &mut flat).unwrap();
        flat.sort();
        assert_eq!(flat, vec![dir.path().join("a.fits"), dir.path().join("b.fit")]);

        let mut all = Vec::new();
        find_fits_files(dir.path(), true, None, &mut all).unwrap();
        assert_eq!(all.len(), 3);
    }

    fn write_frame(path: &Path, width: usize, height: usize) {
        let pixels: Vec<i32> = (0..(width * height) as i32).collect();
        let mut hdu = Hdu::new(&[width, height], pixels);
        hdu.insert("GAIN", 150);
        Fits::create(path, hdu).unwrap();
    }

    #[test]
    fn test_load_raw_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.fits");
        write_frame(&path, 4, 3);

        let raw = load_raw_frame(&path, &["GAIN", "EL"]).unwrap();
        assert_eq!(raw.shape, vec![3, 4]);
        assert_eq!(raw.data.len(), 12);
        assert_eq!(raw.data[5], 5.0);
        assert_eq!(raw.metadata.get("GAIN"), Some(&CardValue::Integer(150)));
        assert!(!raw.metadata.contains_key("EL"));
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.fits");
        write_frame(&path, 64, 64);

        let bytes = fs::read(&path).unwrap();
        // header plus half of the 16 KiB data unit
        fs::write(&path, &bytes[..BLOCK_SIZE + 8192]).unwrap();

        let err = load_raw_frame(&path, &["GAIN"]).unwrap_err();
        assert!(err.to_string().contains("Truncated FITS file"), "{:#}", err);
    }

    #[test]
    fn test_header_without_end_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header_only.fits");
        write_frame(&path, 8, 8);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..CARD_SIZE * 4]).unwrap();

        assert!(load_raw_frame(&path, &["GAIN"]).is_err());
    }
}
