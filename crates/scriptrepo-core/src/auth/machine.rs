//! Machine identity and the cache key derived from it.
//!
//! The key only obfuscates the login cache. Anyone who can read the cache
//! file and reproduce this machine's identifier can decrypt it; it is meant
//! to stop casual copying or editing of the file, not a motivated attacker.

use std::process::Command;

use argon2::Argon2;
use mac_address::{MacAddress, MacAddressIterator};
use tracing::debug;

use super::CacheError;

/// Fixed salt for key derivation. Changing it invalidates every cache file.
const KEY_SALT: &[u8] = b"scriptrepo-login-cache-v1";

pub const KEY_LEN: usize = 32;

/// Symmetric key for the login cache, derived from a machine identifier.
#[derive(Clone)]
pub struct MachineKey([u8; KEY_LEN]);

impl MachineKey {
    /// Hash an identifier into a fixed-size key.
    pub fn derive(identifier: &str) -> Result<Self, CacheError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(identifier.as_bytes(), KEY_SALT, &mut key)
            .map_err(|e| CacheError::MachineKey(e.to_string()))?;
        Ok(Self(key))
    }

    /// Derive the key for the machine this process runs on.
    pub fn for_this_machine() -> Result<Self, CacheError> {
        let identifier = machine_identifier()
            .ok_or_else(|| CacheError::MachineKey("no machine identifier available".to_string()))?;
        Self::derive(&identifier)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MachineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MachineKey(..)")
    }
}

/// Best-effort stable identifier for this machine.
///
/// Tried in order: the primary interface's MAC address, the first non-zero
/// MAC of any interface, a hardware address scraped from `ifconfig -a`, and
/// finally `<user>*<os>`.
pub fn machine_identifier() -> Option<String> {
    primary_mac()
        .or_else(any_interface_mac)
        .or_else(ifconfig_mac)
        .or_else(user_and_os)
}

fn primary_mac() -> Option<String> {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) if !is_zero(&mac) => Some(format_mac(&mac.bytes())),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Primary interface MAC lookup failed");
            None
        }
    }
}

fn any_interface_mac() -> Option<String> {
    let mut interfaces = match MacAddressIterator::new() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!(error = %e, "Could not enumerate network interfaces");
            return None;
        }
    };
    interfaces
        .find(|mac| !is_zero(mac))
        .map(|mac| format_mac(&mac.bytes()))
}

fn ifconfig_mac() -> Option<String> {
    let output = Command::new("ifconfig").arg("-a").output().ok()?;
    parse_ifconfig(&String::from_utf8_lossy(&output.stdout))
}

fn user_and_os() -> Option<String> {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())?;
    Some(format!("{}*{}", user, std::env::consts::OS))
}

fn is_zero(mac: &MacAddress) -> bool {
    mac.bytes().iter().all(|b| *b == 0)
}

/// Upper-case hex pairs joined by `-`, e.g. `0A-1B-2C-3D-4E-5F`.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("-")
}

/// Pull the first non-zero hardware address out of `ifconfig -a` output.
/// Understands both the `HWaddr` (net-tools) and `ether` (BSD/macOS) forms.
fn parse_ifconfig(output: &str) -> Option<String> {
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token != "HWaddr" && token != "ether" {
                continue;
            }
            let Some(addr) = tokens.next() else { break };
            let bytes: Option<Vec<u8>> = addr
                .split(|c: char| c == ':' || c == '-')
                .map(|part| u8::from_str_radix(part, 16).ok())
                .collect();
            match bytes {
                Some(bytes) if bytes.len() == 6 && bytes.iter().any(|b| *b != 0) => {
                    return Some(format_mac(&bytes));
                }
                _ => break,
            }
        }
    }
    None
}
