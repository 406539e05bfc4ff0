use crate::model::EtlConfig;
use crate::sql;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Fingerprint of the view definition as it would be submitted.
///
/// Whitespace is collapsed so reformatting the YAML does not count as a change.
pub fn view_fingerprint(cfg: &EtlConfig) -> Fingerprint {
    let stmt = sql::create_or_replace_view(&cfg.view);
    let parts = vec![
        format!("database={}", cfg.database),
        format!("view={}", cfg.view.name),
        format!("definition={}", collapse_whitespace(&stmt)),
    ];
    let hex = sha256_hex(&parts.join("\n"));
    Fingerprint {
        hex,
        components: parts,
    }
}

/// History key the view fingerprint is stored under.
pub fn view_key(cfg: &EtlConfig) -> String {
    format!("view:{}.{}", cfg.database, cfg.view.name)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
