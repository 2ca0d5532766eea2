//! Boot envelope and host archive
//!
//! JSON structures exchanged during boot, always sealed with the token
//! cipher. Byte fields travel as base64 strings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tincmesh_common::{Result, TokenCipher};

/// Self-description a joiner sends: its node name and raw host-file bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Config", with = "base64_bytes")]
    pub config: Vec<u8>,
}

impl Envelope {
    /// Encode as JSON and seal with the token cipher
    pub fn seal(&self, cipher: &TokenCipher) -> Result<Vec<u8>> {
        cipher.seal(&serde_json::to_vec(self)?)
    }

    /// Open a sealed envelope
    pub fn open(cipher: &TokenCipher, data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(&cipher.open(data)?)?)
    }
}

/// Raw host-file bytes inside JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blob(#[serde(with = "base64_bytes")] pub Vec<u8>);

/// The boot response: every known host file, keyed by node name
pub type HostArchive = HashMap<String, Blob>;

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tincmesh_common::Error;

    #[test]
    fn test_envelope_round_trip() {
        let cipher = TokenCipher::new("shared token");
        let envelope = Envelope {
            name: "nodea".to_string(),
            config: b"Subnet = 172.16.0.1/32\n".to_vec(),
        };

        let sealed = envelope.seal(&cipher).unwrap();
        let opened = Envelope::open(&cipher, &sealed).unwrap();
        assert_eq!(opened, envelope);
    }

    #[test]
    fn test_envelope_wrong_token() {
        let envelope = Envelope {
            name: "nodea".to_string(),
            config: vec![1, 2, 3],
        };
        let sealed = envelope.seal(&TokenCipher::new("one")).unwrap();
        assert!(matches!(
            Envelope::open(&TokenCipher::new("two"), &sealed),
            Err(Error::AuthFailure)
        ));
    }

    #[test]
    fn test_config_travels_as_base64() {
        let envelope = Envelope {
            name: "nodea".to_string(),
            config: b"\x00\xff raw".to_vec(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["Config"].is_string());
        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_archive_round_trip() {
        let mut archive = HostArchive::new();
        archive.insert("nodea".to_string(), Blob(b"Subnet = 10.0.0.1/32\n".to_vec()));

        let json = serde_json::to_vec(&archive).unwrap();
        let back: HostArchive = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, archive);
    }
}
