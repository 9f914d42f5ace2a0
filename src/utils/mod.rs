use std::path::Path;
use anyhow::{Context, Result};

/// Ensure directory exists
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))?;
    }
    Ok(())
}

/// Format number with commas
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Share of `part` in `total` as a percentage, 0 for an empty total
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Random number utilities
pub mod random {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Create RNG with fixed seed
    pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }
}

/// Validation utilities
pub mod validation {
    use anyhow::{bail, Result};

    /// Validate that value is in range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(value: T, min: T, max: T, name: &str) -> Result<()> {
        if !(value >= min && value <= max) {
            bail!("{} must be between {} and {}, got {}", name, min, max, value);
        }
        Ok(())
    }

    /// Validate that value is positive
    pub fn positive<T: PartialOrd + Default + std::fmt::Display>(value: T, name: &str) -> Result<()> {
        if value <= T::default() {
            bail!("{} must be positive, got {}", name, value);
        }
        Ok(())
    }

    /// Validate that value is not negative
    pub fn non_negative<T: PartialOrd + Default + std::fmt::Display>(value: T, name: &str) -> Result<()> {
        if value < T::default() {
            bail!("{} must not be negative, got {}", name, value);
        }
        Ok(())
    }
}

/// Collection utilities
pub mod collections {
    /// Split a slice into owned batches of at most `batch_size` elements
    pub fn chunk<T: Clone>(data: &[T], batch_size: usize) -> Vec<Vec<T>> {
        data.chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(3, 0), 0.0);
    }

    #[test]
    fn test_seeded_rng() {
        let a: Vec<u32> = (0..5).map({
            let mut rng = random::seeded_rng(42);
            move |_| rng.gen()
        }).collect();
        let b: Vec<u32> = (0..5).map({
            let mut rng = random::seeded_rng(42);
            move |_| rng.gen()
        }).collect();

        assert_eq!(a, b);
    }

    #[test]
    fn test_validation() {
        assert!(validation::in_range(0.5, 0.0, 1.0, "value").is_ok());
        assert!(validation::in_range(1.5, 0.0, 1.0, "value").is_err());
        assert!(validation::in_range(f64::NAN, 0.0, 1.0, "value").is_err());

        assert!(validation::positive(1, "value").is_ok());
        assert!(validation::positive(0, "value").is_err());

        assert!(validation::non_negative(0, "value").is_ok());
        assert!(validation::non_negative(-1, "value").is_err());
    }

    #[test]
    fn test_chunk() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let chunks = collections::chunk(&data, 3);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], vec![1, 2, 3]);
        assert_eq!(chunks[3], vec![10]);
    }

    #[test]
    fn test_ensure_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");

        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
