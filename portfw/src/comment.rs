// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Identity encoding. The router keeps no metadata for us other than the free-text comment
//! of each rule, so the owning service is encoded there as `<prefix>.<namespace>.<name>`.

/// Prefix of the comment of every rule we own
pub const COMMENT_PREFIX: &str = "routeros.autoport";

/// Separator between the comment components
pub const SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Comment '{0}' does not carry the routeros.autoport prefix")]
    NotOwned(String),
    #[error("Comment '{0}' lacks a namespace or a name")]
    Malformed(String),
    #[error("Namespace '{0}' contains the separator '.'")]
    AmbiguousNamespace(String),
    #[error("Empty namespace or name")]
    Empty,
}

/// Check that `namespace` and `name` can be encoded and decoded back unchanged
pub(crate) fn validate_identity(namespace: &str, name: &str) -> Result<(), IdentityError> {
    if namespace.is_empty() || name.is_empty() {
        return Err(IdentityError::Empty);
    }
    if namespace.contains(SEPARATOR) {
        return Err(IdentityError::AmbiguousNamespace(namespace.to_string()));
    }
    Ok(())
}

#[must_use]
pub fn encode_comment(namespace: &str, name: &str) -> String {
    format!("{COMMENT_PREFIX}{SEPARATOR}{namespace}{SEPARATOR}{name}")
}

/// Recover the namespace and name encoded in `comment`
///
/// # Errors
/// Fails if the comment was not produced by [`encode_comment`].
pub fn decode_comment(comment: &str) -> Result<(&str, &str), IdentityError> {
    let data = comment
        .strip_prefix(COMMENT_PREFIX)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
        .ok_or_else(|| IdentityError::NotOwned(comment.to_string()))?;
    match data.split_once(SEPARATOR) {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        _ => Err(IdentityError::Malformed(comment.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode() {
        assert_eq!(
            decode_comment("routeros.autoport.default.web").unwrap(),
            ("default", "web")
        );
        // names may contain the separator
        assert_eq!(
            decode_comment("routeros.autoport.media.plex.v2").unwrap(),
            ("media", "plex.v2")
        );
        for foreign in ["", "routeros.autoport", "routeros.autoportx.a.b", "allow ssh"] {
            assert!(matches!(
                decode_comment(foreign),
                Err(IdentityError::NotOwned(_))
            ));
        }
        for malformed in [
            "routeros.autoport.",
            "routeros.autoport.default",
            "routeros.autoport.default.",
            "routeros.autoport..web",
        ] {
            assert!(matches!(
                decode_comment(malformed),
                Err(IdentityError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_round_trip() {
        bolero::check!()
            .with_type::<(String, String)>()
            .for_each(|(namespace, name)| {
                if validate_identity(namespace, name).is_err() {
                    return;
                }
                let comment = encode_comment(namespace, name);
                assert!(comment.starts_with(COMMENT_PREFIX));
                let (ns, n) = decode_comment(&comment).unwrap();
                assert_eq!((ns, n), (namespace.as_str(), name.as_str()));
            });
    }
}
