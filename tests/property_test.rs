mod common;

use common::Fixture;
use proptest::prelude::*;
use std::path::{Path, PathBuf};
use testrig::virtual_mock_path;

proptest! {
    #[test]
    fn bare_specifiers_pass_through_unchanged(name in "[a-z][a-z0-9]{0,10}") {
        let from = Path::new("/t/x.js");
        prop_assert_eq!(virtual_mock_path(from, &name), PathBuf::from(&name));
        // Deterministic across calls.
        prop_assert_eq!(virtual_mock_path(from, &name), virtual_mock_path(from, &name));
    }

    #[test]
    fn relative_specifiers_normalise_into_the_requesting_directory(name in "[a-z]{1,8}") {
        let from = Path::new("/t/sub/x.js");
        prop_assert_eq!(
            virtual_mock_path(from, &format!("./{}", name)),
            PathBuf::from(format!("/t/sub/{}", name))
        );
        prop_assert_eq!(
            virtual_mock_path(from, &format!("../{}", name)),
            PathBuf::from(format!("/t/{}", name))
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// However mock/unmock marks interleave, the oracle answers with the
    /// last mark.
    #[test]
    fn last_explicit_mark_wins(marks in proptest::collection::vec(any::<bool>(), 1..6)) {
        let fx = Fixture::new();
        let entry = fx.path("x.js");
        fx.file("m.js", "exports.m = 1;\n");
        let runtime = fx.runtime();
        let facade = runtime.create_facade(&entry);

        for &mark in &marks {
            if mark {
                facade.mock("./m");
            } else {
                facade.unmock("./m");
            }
        }

        let expected = *marks.last().unwrap();
        prop_assert_eq!(runtime.should_mock(&entry, "./m").unwrap(), expected);
    }
}
