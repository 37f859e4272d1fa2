use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::Site;

/// Kubernetes object names and DNS labels.
pub const DNS_LABEL_MAX: usize = 63;

const HASH_LEN: usize = 6;

/// Turn an arbitrary string (usually a domain) into a name made of
/// `[a-z0-9-]` that fits in `max_len`.
///
/// Input that is already a valid name is returned unchanged. Anything else is
/// cleaned, truncated and suffixed with a short hash of the (lower-cased)
/// input, so `example.com` and `example-com` never collide. Because every
/// output is itself a valid name, the function is idempotent.
///
/// Limits too small to hold a hash suffix get the bare truncated name.
pub fn sanitize_name(input: &str, max_len: usize) -> String {
    if is_valid_name(input, max_len) {
        return input.to_string();
    }

    let mut cleaned = String::with_capacity(input.len());
    for ch in input.chars().flat_map(char::to_lowercase) {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if ch == '-' && (cleaned.is_empty() || cleaned.ends_with('-')) {
            continue;
        }
        cleaned.push(ch);
    }

    if max_len < HASH_LEN + 2 {
        return truncated(&cleaned, max_len);
    }
    let base = truncated(&cleaned, max_len - HASH_LEN - 1);
    format!("{}-{}", base, short_hash(&input.to_lowercase()))
}

fn truncated(cleaned: &str, room: usize) -> String {
    let mut base: String = cleaned.chars().take(room).collect();
    while base.ends_with('-') {
        base.pop();
    }
    if base.is_empty() {
        base = "site".chars().take(room).collect();
    }
    base
}

pub fn is_valid_name(name: &str, max_len: usize) -> bool {
    !name.is_empty()
        && name.len() <= max_len
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Reject anything that is not a plain lower-case hostname. Domains end up
/// in file paths and web-server configs verbatim.
pub fn validate_domain(domain: &str) -> Result<()> {
    let invalid = |why: &str| Error::Validation(format!("invalid domain '{}': {}", domain, why));

    if domain.is_empty() || domain.len() > 253 {
        return Err(invalid("must be 1-253 characters"));
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > DNS_LABEL_MAX {
            return Err(invalid("empty or oversized label"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(invalid("only a-z, 0-9, '-' and '.' are allowed"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels cannot start or end with '-'"));
        }
    }
    Ok(())
}

/// The domain and every alias of a site. All of them are written into
/// server blocks, routing rules and Ingress hosts.
pub fn validate_site_names(site: &Site) -> Result<()> {
    validate_domain(&site.domain)?;
    for alias in &site.aliases {
        validate_domain(alias)?;
    }
    Ok(())
}

/// Every backend object name derived from a site's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteNames {
    /// Sanitized domain; also the Kubernetes namespace.
    pub slug: String,
    pub compose_project: String,
    pub network: String,
}

/// Docker allows long names, but the project is also a container-name prefix.
const COMPOSE_PROJECT_MAX: usize = 48;

impl SiteNames {
    pub fn for_site(site: &Site) -> Self {
        let slug = sanitize_name(&site.domain, DNS_LABEL_MAX);
        let compose_project = sanitize_name(&site.domain, COMPOSE_PROJECT_MAX);
        let network = format!("{}-net", compose_project);
        Self {
            slug,
            compose_project,
            network,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.slug
    }

    pub fn container(&self, service: &str) -> String {
        format!("{}-{}", self.compose_project, service)
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "example.com",
        "Example.COM",
        "shop.test",
        "my_site--name.co.uk",
        "---",
        "",
        "a",
        "xn--bcher-kva.example",
        "ünïcödé.example",
        "a-very-long-subdomain-name-that-keeps-going.and-going.and-going.example.org",
        "already-valid",
    ];

    #[test]
    fn output_is_bounded_and_restricted() {
        for input in SAMPLES {
            for max in [8, 20, DNS_LABEL_MAX] {
                let name = sanitize_name(input, max);
                assert!(is_valid_name(&name, max), "{:?} -> {:?} (max {})", input, name, max);
            }
        }
    }

    #[test]
    fn sanitizing_twice_changes_nothing() {
        for input in SAMPLES {
            let once = sanitize_name(input, DNS_LABEL_MAX);
            assert_eq!(sanitize_name(&once, DNS_LABEL_MAX), once, "input {:?}", input);
        }
    }

    #[test]
    fn similar_domains_do_not_collide() {
        let dotted = sanitize_name("example.com", DNS_LABEL_MAX);
        let dashed = sanitize_name("example-com", DNS_LABEL_MAX);
        assert_ne!(dotted, dashed);
        assert!(dotted.starts_with("example-com-"));
        assert_eq!(dashed, "example-com");
    }

    #[test]
    fn case_does_not_change_the_name() {
        assert_eq!(
            sanitize_name("Example.COM", DNS_LABEL_MAX),
            sanitize_name("example.com", DNS_LABEL_MAX)
        );
    }

    #[test]
    fn domain_validation() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("shop.test").is_ok());
        assert!(validate_domain("xn--bcher-kva.example").is_ok());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("Example.com").is_err());
        assert!(validate_domain("a..b").is_err());
        assert!(validate_domain("-a.com").is_err());
        assert!(validate_domain("a.com; rm -rf /").is_err());
        assert!(validate_domain("../etc").is_err());
    }

    #[test]
    fn aliases_are_validated_with_the_domain() {
        let mut site = Site::new("shop.test", "web1");
        site.aliases = vec!["www.shop.test".into()];
        assert!(validate_site_names(&site).is_ok());

        site.aliases.push("www.shop.test;\n    root /etc;\n    autoindex on".into());
        assert!(matches!(
            validate_site_names(&site),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn tiny_limits_are_honoured() {
        for max_len in 1..=8 {
            let name = sanitize_name("Shop.Example.com", max_len);
            assert!(name.len() <= max_len, "{} exceeds {}", name, max_len);
            assert!(is_valid_name(&name, max_len));
            assert_eq!(sanitize_name(&name, max_len), name);
        }
        assert_eq!(sanitize_name("shop.test", 4), "shop");
    }

    #[test]
    fn site_names_share_one_slug() {
        let names = SiteNames::for_site(&Site::new("example.com", "web1"));
        assert_eq!(names.namespace(), names.slug);
        assert!(names.slug.starts_with("example-com-"));
        assert_eq!(names.network, format!("{}-net", names.compose_project));
        assert_eq!(names.container("web"), format!("{}-web", names.compose_project));
    }

    #[test]
    fn long_names_are_truncated_with_suffix() {
        let long = "a".repeat(100) + ".example";
        let name = sanitize_name(&long, DNS_LABEL_MAX);
        assert_eq!(name.len(), DNS_LABEL_MAX);
        assert!(name.starts_with("aaaa"));
    }
}
