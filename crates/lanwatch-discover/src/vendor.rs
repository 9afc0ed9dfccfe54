//! Hardware vendor lookup.
//!
//! Maps the OUI (first three octets of a MAC address) to a manufacturer.
//! The built-in table covers common home and virtualisation vendors and can
//! be extended from an IEEE `oui.txt` registry. Every prefix is looked up at
//! most once per process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use lanwatch_core::types::normalize_mac;

/// Returned for prefixes with no known vendor.
pub const UNKNOWN_VENDOR: &str = "unknown";

const BUILTIN_OUI: &[(&str, &str)] = &[
    ("00:00:0C", "Cisco Systems, Inc"),
    ("00:00:5E", "IANA"),
    ("00:0C:29", "VMware, Inc."),
    ("00:0F:FE", "Intel Corporate"),
    ("00:11:32", "Synology Incorporated"),
    ("00:15:5D", "Microsoft Corporation"),
    ("00:17:F2", "Apple, Inc."),
    ("00:18:8B", "Microsoft Corporation"),
    ("00:1A:11", "Samsung Electronics Co.,Ltd"),
    ("00:1B:21", "Intel Corporate"),
    ("00:1C:B3", "Apple, Inc."),
    ("00:23:24", "Apple, Inc."),
    ("00:26:BB", "Apple, Inc."),
    ("00:50:56", "VMware, Inc."),
    ("08:00:27", "Oracle VirtualBox"),
    ("14:CC:20", "TP-Link Technologies Co.,Ltd"),
    ("28:6C:07", "Xiaomi Communications Co Ltd"),
    ("2C:F0:5D", "Micro-Star International"),
    ("3C:84:6A", "TP-Link Technologies Co.,Ltd"),
    ("52:54:00", "QEMU virtual NIC"),
    ("A0:40:A0", "Netgear"),
    ("AC:DE:48", "Apple, Inc."),
    ("B8:27:EB", "Raspberry Pi Foundation"),
    ("C0:56:27", "Belkin International (Linksys)"),
    ("D8:27:27", "Samsung Electronics Co.,Ltd"),
    ("D8:9E:F3", "Apple, Inc."),
    ("DC:A6:32", "Raspberry Pi Trading Ltd"),
    ("E4:5F:01", "Raspberry Pi Trading Ltd"),
    ("E8:4E:06", "Huawei Technologies Co.,Ltd"),
    ("F0:18:98", "Apple, Inc."),
];

/// Memoizing OUI to vendor resolver.
#[derive(Debug)]
pub struct VendorCache {
    table: HashMap<String, String>,
    memo: Mutex<HashMap<String, String>>,
}

impl Default for VendorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorCache {
    /// A cache backed by the built-in table.
    pub fn new() -> Self {
        let table = BUILTIN_OUI
            .iter()
            .map(|(oui, vendor)| (oui.to_string(), vendor.to_string()))
            .collect();
        Self {
            table,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Built-in table plus the entries of an IEEE `oui.txt` registry.
    pub fn with_registry(path: &Path) -> std::io::Result<Self> {
        let mut cache = Self::new();
        let text = std::fs::read_to_string(path)?;
        let entries = parse_registry(&text);
        tracing::info!(path = %path.display(), entries = entries.len(), "Loaded OUI registry");
        cache.table.extend(entries);
        Ok(cache)
    }

    /// Vendor for a MAC address, or [`UNKNOWN_VENDOR`].
    pub fn lookup(&self, mac: &str) -> String {
        let Some(prefix) = oui_prefix(mac) else {
            return UNKNOWN_VENDOR.to_string();
        };

        let mut memo = match self.memo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        memo.entry(prefix)
            .or_insert_with_key(|prefix| {
                self.table
                    .get(prefix)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_VENDOR.to_string())
            })
            .clone()
    }

    /// Number of memoized prefixes.
    pub fn memoized(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// `AA:BB:CC` prefix of a MAC address.
fn oui_prefix(mac: &str) -> Option<String> {
    normalize_mac(mac).map(|m| m[..8].to_string())
}

/// Parse `XXXXXX     (base 16)\t\tVendor` and `XX-XX-XX   (hex)\t\tVendor` lines.
fn parse_registry(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once("(hex)").or_else(|| line.split_once("(base 16)"))?;
            let hex: String = key.trim().chars().filter(|c| c.is_ascii_hexdigit()).collect();
            let vendor = rest.trim();
            if hex.len() != 6 || vendor.is_empty() {
                return None;
            }
            let prefix = format!("{}:{}:{}", &hex[0..2], &hex[2..4], &hex[4..6]).to_uppercase();
            Some((prefix, vendor.to_string()))
        })
        .collect()
}
