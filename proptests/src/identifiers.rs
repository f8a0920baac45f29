//! Identifier and origin-parsing properties.

use crate::strategies::content_id_strategy;
use common::is_content_id;
use proptest::prelude::*;
use verifier::fetch::{hostname_of, origin_of};

proptest! {
    /// Every string the generator produces is accepted as a content id.
    #[test]
    fn prop_generated_ids_have_content_id_shape(id in content_id_strategy()) {
        prop_assert!(is_content_id(&id));
    }

    /// Any length other than 43 is rejected outright.
    #[test]
    fn prop_wrong_length_rejected(s in "[A-Za-z0-9_-]{0,60}") {
        prop_assert_eq!(is_content_id(&s), s.len() == 43);
    }

    /// One character outside the base64url alphabet poisons the id.
    #[test]
    fn prop_bad_character_rejected(
        id in content_id_strategy(),
        pos in 0..43usize,
        bad in "[+/=. ]",
    ) {
        let mut poisoned = id;
        poisoned.replace_range(pos..pos + 1, &bad);
        prop_assert!(!is_content_id(&poisoned));
    }

    /// Hostnames extracted from URLs carry no scheme, port, or path, and
    /// the same host reached different ways maps to one health key.
    #[test]
    fn prop_hostname_is_canonical(
        host in "[a-z][a-z0-9]{1,12}\\.[a-z]{2,5}",
        port in 1u16..=65535,
        path in "[a-z0-9/]{0,16}",
    ) {
        let bare = hostname_of(&format!("https://{host}"));
        prop_assert_eq!(&bare, &host);

        let with_port = hostname_of(&format!("https://{host}:{port}/{path}"));
        prop_assert_eq!(&with_port, &host);

        let http = hostname_of(&format!("http://{host}/{path}"));
        prop_assert_eq!(&http, &host);
    }

    /// `origin_of` keeps exactly scheme and authority.
    #[test]
    fn prop_origin_strips_path(
        host in "[a-z][a-z0-9]{1,12}\\.[a-z]{2,5}",
        path in "[a-z0-9/]{0,16}",
    ) {
        let origin = origin_of(&format!("https://{host}/{path}"));
        prop_assert_eq!(origin, format!("https://{host}"));
    }
}
