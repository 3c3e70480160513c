/// Upper bound on the names of resources derived from a NodePool
pub const MAX_RESOURCE_NAME_LENGTH: usize = 43;

/// Name shared by every resource generated for a NodePool
pub fn resource_name(infra_id: &str, cluster_name: &str, pool_name: &str) -> String {
    derive_name(
        &format!("{infra_id}-{cluster_name}"),
        pool_name,
        MAX_RESOURCE_NAME_LENGTH,
    )
}

/// Join `base` and `suffix` with a dash, fitting the result into `max_length` bytes.
///
/// When the join is too long, the base is truncated and a hash keeps the result unique:
/// `<base>-<hash(base)>-<suffix>` if the suffix still fits,
/// otherwise `<base>-<hash(base-suffix)>` cut to `max_length`.
pub fn derive_name(base: &str, suffix: &str, max_length: usize) -> String {
    if max_length == 0 {
        return String::new();
    }

    let joined = format!("{base}-{suffix}");
    if joined.len() <= max_length {
        return joined;
    }

    // room left for the base once "-<8 hex>-" and the suffix are in
    match max_length.checked_sub(10 + suffix.len()) {
        None => {
            let prefix = truncate(base, max_length.saturating_sub(9));
            let short = format!("{prefix}-{}", hash(&joined));
            truncate(&short, max_length).to_owned()
        }
        Some(budget) => format!("{}-{}-{suffix}", truncate(base, budget), hash(base)),
    }
}

/// Longest prefix of `s` no longer than `max` bytes that ends on a char boundary
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a, as 8 lowercase hex digits
pub fn hash(s: &str) -> String {
    let digest = s.bytes().fold(FNV_OFFSET_BASIS, |acc, byte| {
        (acc ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    format!("{digest:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(hash(""), "811c9dc5");
        assert_eq!(hash("a"), "e40c292c");
        assert_eq!(hash("foobar"), "bf9cf968");
    }

    #[test]
    fn short_names_are_joined_exactly() {
        assert_eq!(derive_name("infra1-example", "pool", 43), "infra1-example-pool");
        assert_eq!(resource_name("infra1", "example", "pool"), "infra1-example-pool");
    }

    #[test]
    fn zero_max_length_is_empty() {
        assert_eq!(derive_name("base", "suffix", 0), "");
    }

    #[test]
    fn long_base_keeps_the_suffix() {
        let base = "a".repeat(40);
        let name = derive_name(&base, "workers", 43);

        assert_eq!(name.len(), 43);
        assert_eq!(name, format!("{}-{}-workers", "a".repeat(26), hash(&base)));
    }

    #[test]
    fn long_suffix_is_replaced_by_a_hash() {
        let suffix = "s".repeat(47);
        let name = derive_name("infra1-mycluster", &suffix, 43);

        assert!(name.len() <= 43);
        assert_eq!(
            name,
            format!("infra1-mycluster-{}", hash(&format!("infra1-mycluster-{suffix}")))
        );
    }

    #[test]
    fn long_suffix_with_long_base_is_cut_to_max_length() {
        let base = "b".repeat(60);
        let suffix = "s".repeat(60);
        let name = derive_name(&base, &suffix, 43);

        assert_eq!(name.len(), 43);
        assert!(name.starts_with(&"b".repeat(34)));
        assert_eq!(&name[34..35], "-");
    }

    #[test]
    fn names_are_deterministic_and_hash_sensitive() {
        let base = "infra1-".repeat(8);
        assert_eq!(derive_name(&base, "pool", 43), derive_name(&base, "pool", 43));

        let other = format!("{}x", &base[..base.len() - 1]);
        assert_ne!(derive_name(&base, "pool", 43), derive_name(&other, "pool", 43));
    }

    #[test]
    fn truncation_never_splits_characters() {
        let base = "é".repeat(30);
        let name = derive_name(&base, "pool", 43);

        assert!(name.len() <= 43);
        assert!(name.ends_with("-pool"));
    }

    #[test]
    fn bounds_hold_for_all_lengths() {
        for max_length in 0..64 {
            for suffix_len in [0, 1, 5, 33, 34, 40, 80] {
                let suffix = "x".repeat(suffix_len);
                let name = derive_name("infra-0123456789-cluster", &suffix, max_length);
                assert!(name.len() <= max_length, "{max_length} {suffix_len}: {name}");
            }
        }
    }
}
