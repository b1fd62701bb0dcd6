//! Config file loading
//!
//! `loam.toml` mirrors RuntimeConfig field for field. An explicitly
//! passed path must exist; the implicit `./loam.toml` is optional.

use std::path::Path;

use loam_runtime::context::RuntimeConfig;

pub fn load(explicit: Option<&Path>) -> Result<RuntimeConfig, String> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let implicit = Path::new("loam.toml");
            if !implicit.is_file() {
                return Ok(RuntimeConfig::default());
            }
            implicit.to_path_buf()
        }
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    toml::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_runtime::context::Backend;
    use std::io::Write;

    #[test]
    fn test_missing_implicit_config_is_defaults() {
        let cfg = load(None).unwrap();
        assert!(cfg.gc_enabled);
    }

    #[test]
    fn test_explicit_config_parses() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "backend = \"compare\"\ngc-enabled = false\nclasspath = [\"src\"]"
        )
        .unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.backend, Backend::Compare);
        assert!(!cfg.gc_enabled);
        assert_eq!(cfg.classpath.len(), 1);
    }

    #[test]
    fn test_explicit_missing_config_errors() {
        assert!(load(Some(Path::new("/no/such/loam.toml"))).is_err());
    }
}
