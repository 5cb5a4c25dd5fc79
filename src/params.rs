use crate::error::ConfigError;
use crate::hash::HashAlgorithm;
use crate::number;
use log::{debug, warn};
use num_bigint::BigUint;
use num_traits::One;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_dh_groups() {
        let registry = DhRegistry::builtin().unwrap();
        let group = registry.lookup("modp-1536").unwrap();
        assert_eq!(group.p.bits(), 1536);
        assert_eq!(group.g, BigUint::from(2u8));
        assert_eq!(registry.lookup("modp-2048").unwrap().p.bits(), 2048);
        assert_eq!(registry.lookup("srp-1024").unwrap().p.bits(), 1024);
        assert_eq!(
            registry.lookup("modp-9999").err(),
            Some(ConfigError::UnknownGroup("modp-9999".to_string()))
        );
    }

    #[test]
    fn test_builtin_srp_groups() {
        let registry = SrpRegistry::builtin().unwrap();
        let group = registry.lookup(1).unwrap();
        assert_eq!(group.n.bits(), 1024);
        assert_eq!(group.hash, HashAlgorithm::Sha1);
        assert_eq!(registry.lookup(4).unwrap().hash, HashAlgorithm::Sha512);
        assert_eq!(registry.min_id(), Some(1));
        assert_eq!(registry.max_id(), Some(4));
    }

    #[test]
    fn test_dh_accepts_single_string_and_skips_bad_entries() {
        let registry = DhRegistry::from_json(
            r#"{"dh_parameters": [
                {"name": "tiny", "p": "17", "g": "05"},
                {"name": "broken", "p": "not hex", "g": "02"},
                {"name": "no-generator", "p": "17"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(registry.names(), vec!["tiny"]);
        assert_eq!(registry.lookup("tiny").unwrap().p, BigUint::from(23u8));
    }

    #[test]
    fn test_missing_top_level_is_malformed() {
        match DhRegistry::from_json(r#"{"groups": []}"#) {
            Err(ConfigError::Malformed(_)) => {}
            other => panic!("unexpected result {:?}", other.map(|r| r.names().len())),
        }
        match SrpRegistry::from_json("[]") {
            Err(ConfigError::Malformed(_)) => {}
            other => panic!("unexpected result {:?}", other.map(|r| r.max_id())),
        }
    }

    #[test]
    fn test_srp_skips_unknown_hash() {
        let registry = SrpRegistry::from_json(
            r#"{"srp_parameters": [
                {"id": 7, "name": "a", "N": ["1", "7"], "g": 5, "hash": "SHA-256"},
                {"id": 8, "name": "b", "N": "17", "g": 5, "hash": "MD5"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(registry.lookup(7).unwrap().n, BigUint::from(23u8));
        assert!(registry.lookup(8).is_err());
    }

    #[test]
    fn test_clamp_group() {
        let registry = SrpRegistry::builtin().unwrap();
        assert_eq!(registry.clamp_group(Some(3), 2), 3);
        assert_eq!(registry.clamp_group(Some(1), 2), 2);
        assert_eq!(registry.clamp_group(Some(9), 2), 2);
        assert_eq!(registry.clamp_group(None, 2), 2);
        assert_eq!(registry.clamp_group(None, 0), 1);
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexField {
    Single(String),
    Chunks(Vec<String>),
}

impl HexField {
    fn parse(&self) -> Option<BigUint> {
        match self {
            HexField::Single(hex) => number::from_hex(hex.trim()),
            HexField::Chunks(chunks) => number::from_hex(&chunks.concat()),
        }
    }
}

#[derive(Deserialize)]
struct DhEntry {
    name: String,
    p: HexField,
    g: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct DhDocument {
    dh_parameters: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct SrpEntry {
    id: u32,
    name: String,
    #[serde(rename = "N")]
    n: HexField,
    g: u32,
    hash: String,
}

#[derive(Deserialize)]
struct SrpDocument {
    srp_parameters: Vec<serde_json::Value>,
}

/// A named Diffie-Hellman group.
#[derive(Debug, Clone, PartialEq)]
pub struct DhParameters {
    pub name: String,
    pub p: BigUint,
    pub g: BigUint,
    pub description: Option<String>,
    pub notes: Option<String>,
}

impl DhParameters {
    fn from_entry(entry: DhEntry) -> Result<DhParameters, ConfigError> {
        let p = entry
            .p
            .parse()
            .ok_or(ConfigError::InvalidParameter("p"))?;
        let g = number::from_hex(&entry.g).ok_or(ConfigError::InvalidParameter("g"))?;
        if p <= BigUint::from(3u8) || g <= BigUint::one() || g >= p {
            return Err(ConfigError::InvalidParameter("p/g"));
        }
        Ok(DhParameters {
            name: entry.name,
            p,
            g,
            description: entry.description,
            notes: entry.notes,
        })
    }
}

/// Read-only table of the public Diffie-Hellman groups.
#[derive(Debug, Clone)]
pub struct DhRegistry {
    groups: Vec<DhParameters>,
}

impl DhRegistry {
    pub fn builtin() -> Result<DhRegistry, ConfigError> {
        DhRegistry::from_json(include_str!("../resources/dh_parameters.json"))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<DhRegistry, ConfigError> {
        DhRegistry::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<DhRegistry, ConfigError> {
        let document: DhDocument = serde_json::from_str(json)?;
        let mut groups = Vec::new();
        for value in document.dh_parameters {
            let parsed = serde_json::from_value::<DhEntry>(value)
                .map_err(ConfigError::from)
                .and_then(DhParameters::from_entry);
            match parsed {
                Ok(group) => groups.push(group),
                Err(e) => warn!("skipping dh group entry: {}", e),
            }
        }
        debug!("loaded {} dh groups", groups.len());
        Ok(DhRegistry { groups })
    }

    pub fn lookup(&self, name: &str) -> Result<&DhParameters, ConfigError> {
        self.groups
            .iter()
            .find(|group| group.name == name)
            .ok_or_else(|| ConfigError::UnknownGroup(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.groups.iter().map(|group| group.name.as_str()).collect()
    }
}

/// An SRP group with the hash used for every derivation inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct SrpParameters {
    pub id: u32,
    pub name: String,
    pub n: BigUint,
    pub g: BigUint,
    pub hash: HashAlgorithm,
}

impl SrpParameters {
    fn from_entry(entry: SrpEntry) -> Result<SrpParameters, ConfigError> {
        let n = entry
            .n
            .parse()
            .ok_or(ConfigError::InvalidParameter("N"))?;
        let g = BigUint::from(entry.g);
        if n <= BigUint::from(3u8) || g <= BigUint::one() || g >= n {
            return Err(ConfigError::InvalidParameter("N/g"));
        }
        Ok(SrpParameters {
            id: entry.id,
            name: entry.name,
            n,
            g,
            hash: entry.hash.parse()?,
        })
    }

    /// Byte length of `N`, the width every value is padded to.
    pub fn n_length(&self) -> usize {
        number::byte_length(&self.n)
    }

    /// Salts are never shorter than the digest of the group's hash.
    pub fn salt_length(&self) -> usize {
        self.hash.output_size()
    }
}

#[derive(Debug, Clone)]
pub struct SrpRegistry {
    groups: Vec<SrpParameters>,
}

impl SrpRegistry {
    pub fn builtin() -> Result<SrpRegistry, ConfigError> {
        SrpRegistry::from_json(include_str!("../resources/srp_parameters.json"))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SrpRegistry, ConfigError> {
        SrpRegistry::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<SrpRegistry, ConfigError> {
        let document: SrpDocument = serde_json::from_str(json)?;
        let mut groups = Vec::new();
        for value in document.srp_parameters {
            let parsed = serde_json::from_value::<SrpEntry>(value)
                .map_err(ConfigError::from)
                .and_then(SrpParameters::from_entry);
            match parsed {
                Ok(group) => groups.push(group),
                Err(e) => warn!("skipping srp group entry: {}", e),
            }
        }
        debug!("loaded {} srp groups", groups.len());
        Ok(SrpRegistry { groups })
    }

    pub fn lookup(&self, id: u32) -> Result<&SrpParameters, ConfigError> {
        self.groups
            .iter()
            .find(|group| group.id == id)
            .ok_or_else(|| ConfigError::UnknownGroup(id.to_string()))
    }

    pub fn min_id(&self) -> Option<u32> {
        self.groups.iter().map(|group| group.id).min()
    }

    pub fn max_id(&self) -> Option<u32> {
        self.groups.iter().map(|group| group.id).max()
    }

    /// Picks the group for a registration request. A default below the
    /// smallest known id is raised to it; requests outside
    /// `[default, max]` or naming an unknown id fall back to the default.
    pub fn clamp_group(&self, requested: Option<u32>, default_group_id: u32) -> u32 {
        let default_group_id = match self.min_id() {
            Some(min) if default_group_id < min => min,
            _ => default_group_id,
        };
        match (requested, self.max_id()) {
            (Some(id), Some(max))
                if id >= default_group_id && id <= max && self.lookup(id).is_ok() =>
            {
                id
            }
            _ => default_group_id,
        }
    }
}
