//! Keypair generation and on-disk key material.
//!
//! Stonehouse sockets authenticate with 32-byte key pairs. Keys are
//! stored as small text files: the public file carries the public key
//! only and may be shared; the secret file carries both halves and is
//! written owner-read/write only.

use std::path::Path;

use rand::RngCore;

use crate::error::FabricError;

const KEY_BYTES: usize = 32;

/// A public/secret key pair for stonehouse authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    public: [u8; KEY_BYTES],
    secret: [u8; KEY_BYTES],
}

impl Keypair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let mut public = [0u8; KEY_BYTES];
        let mut secret = [0u8; KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut public);
        rand::thread_rng().fill_bytes(&mut secret);
        Self { public, secret }
    }

    pub fn from_parts(public: [u8; KEY_BYTES], secret: [u8; KEY_BYTES]) -> Self {
        Self { public, secret }
    }

    pub fn public_key(&self) -> &[u8; KEY_BYTES] {
        &self.public
    }

    pub fn secret_key(&self) -> &[u8; KEY_BYTES] {
        &self.secret
    }

    /// Write the public half to a shareable text file.
    pub fn write_public_file(&self, path: impl AsRef<Path>) -> Result<(), FabricError> {
        let contents = format!(
            "# seisbus public key file\npublic-key = \"{}\"\n",
            hex::encode(&self.public)
        );
        write_key_file(path.as_ref(), &contents, 0o644)
    }

    /// Write both halves to a secret text file, owner-only.
    pub fn write_secret_file(&self, path: impl AsRef<Path>) -> Result<(), FabricError> {
        let contents = format!(
            "# seisbus secret key file - keep private\npublic-key = \"{}\"\nsecret-key = \"{}\"\n",
            hex::encode(&self.public),
            hex::encode(&self.secret)
        );
        write_key_file(path.as_ref(), &contents, 0o600)
    }

    /// Load a key pair from a secret file written by
    /// [`write_secret_file`](Self::write_secret_file).
    pub fn load_secret_file(path: impl AsRef<Path>) -> Result<Self, FabricError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let public = parse_key(&contents, "public-key")?;
        let secret = parse_key(&contents, "secret-key")?;
        Ok(Self { public, secret })
    }

    /// Load just a public key from a public or secret key file.
    pub fn load_public_key(path: impl AsRef<Path>) -> Result<[u8; KEY_BYTES], FabricError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        parse_key(&contents, "public-key")
    }
}

impl std::fmt::Debug for Keypair {
    // Never print the secret half.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(&self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn write_key_file(path: &Path, contents: &str, mode: u32) -> Result<(), FabricError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

fn parse_key(contents: &str, field: &str) -> Result<[u8; KEY_BYTES], FabricError> {
    let line = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .find(|l| l.starts_with(field))
        .ok_or_else(|| FabricError::Config(format!("key file is missing {field}")))?;
    let value = line
        .split_once('=')
        .map(|(_, v)| v.trim().trim_matches('"'))
        .ok_or_else(|| FabricError::Config(format!("malformed {field} line in key file")))?;
    let bytes =
        hex::decode(value).map_err(|e| FabricError::Config(format!("bad {field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| FabricError::Config(format!("{field} must be {KEY_BYTES} bytes")))
}

/// Minimal hex codec (avoids pulling in the `hex` crate).
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(text: &str) -> Result<Vec<u8>, String> {
        if text.len() % 2 != 0 {
            return Err("odd-length hex string".into());
        }
        (0..text.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&text[i..i + 2], 16)
                    .map_err(|_| format!("invalid hex at offset {i}"))
            })
            .collect()
    }
}
