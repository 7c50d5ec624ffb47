use std::path::Path;

use anyhow::Result;
use log::{error, info};
use regex::Regex;
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Pulls the last MAC-looking group out of a platform device id,
/// upper-cased. Linux ids embed it, macOS ids do not.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mac_from_bluez_path() {
        let id = "/org/bluez/hci0/dev_C8_9C_3A_28_77_AB";
        assert_eq!(extract_mac_address(id).as_deref(), Some("C8:9C:3A:28:77:AB"));
    }

    #[test]
    fn test_extract_mac_from_windows_id() {
        let id = "BluetoothLE#BluetoothLE00:1a:7d:da:71:13-c8:9c:3a:28:77:ab";
        assert_eq!(extract_mac_address(id).as_deref(), Some("C8:9C:3A:28:77:AB"));
    }

    #[test]
    fn test_extract_mac_absent() {
        assert_eq!(extract_mac_address("4F1C2A9E-0000-1111-2222-333344445555"), None);
    }

    #[tokio::test]
    async fn test_ensure_directory_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_directory_exists(&nested).await.unwrap();
        ensure_directory_exists(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
