// src/tests/property_tests.rs

use crate::platform::PlatformKind;
use crate::policy::compiler::{CompileTarget, DnsDirective, compile};
use crate::policy::parser::parse;
use crate::policy::{PolicyDocument, is_same_or_subdomain};
use proptest::prelude::*;

fn domain() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9]{0,8}", 1..4).prop_map(|labels| {
        let mut name = labels.join(".");
        name.push_str(".org");
        name
    })
}

fn document() -> impl Strategy<Value = PolicyDocument> {
    (
        prop::collection::vec(domain(), 0..8),
        prop::collection::vec(domain(), 0..4),
        prop::collection::vec("/[a-z]{1,6}", 0..4),
    )
        .prop_map(|(allowed, blocked, paths)| {
            let mut text = String::from("## WHITELIST\n");
            for d in &allowed {
                text.push_str(d);
                text.push('\n');
            }
            text.push_str("## BLOCKED-SUBDOMAINS\n");
            for d in &blocked {
                text.push_str(d);
                text.push('\n');
            }
            text.push_str("## BLOCKED-PATHS\n");
            for p in &paths {
                text.push_str(p);
                text.push('\n');
            }
            parse(text.as_bytes())
        })
}

fn target() -> impl Strategy<Value = CompileTarget> {
    (
        prop_oneof![Just(PlatformKind::Linux), Just(PlatformKind::Windows)],
        "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
    )
        .prop_map(|(platform, upstream_dns)| CompileTarget {
            platform,
            upstream_dns,
        })
}

proptest! {
    #[test]
    fn test_parser_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let doc = parse(&bytes);
        for entry in doc.allowed.iter().chain(doc.blocked_subdomains.iter()) {
            prop_assert!(!entry.is_empty());
            prop_assert!(!entry.starts_with("*."));
        }
    }

    #[test]
    fn test_compile_is_deterministic(doc in document(), target in target()) {
        let first = compile(&doc, &target);
        let second = compile(&doc, &target);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_deny_all_precedes_every_allow(doc in document(), target in target()) {
        let artifact = compile(&doc, &target);
        prop_assert_eq!(&artifact.dns.directives[0], &DnsDirective::DenyAll);
        let first_deny = artifact
            .dns
            .directives
            .iter()
            .position(|d| matches!(d, DnsDirective::Deny(_)));
        let last_allow = artifact
            .dns
            .directives
            .iter()
            .rposition(|d| matches!(d, DnsDirective::Allow(_)));
        if let (Some(deny), Some(allow)) = (first_deny, last_allow) {
            prop_assert!(allow < deny);
        }
    }

    #[test]
    fn test_blocked_subdomains_never_resolve(doc in document()) {
        for blocked in &doc.blocked_subdomains {
            prop_assert!(!doc.allows(blocked));
            let child = format!("x.{}", blocked);
            prop_assert!(!doc.allows(&child));
        }
        for allowed in &doc.allowed {
            let shadowed = doc
                .blocked_subdomains
                .iter()
                .any(|b| is_same_or_subdomain(allowed, b));
            prop_assert_eq!(doc.allows(allowed), !shadowed);
        }
    }

    #[test]
    fn test_paths_do_not_affect_dns_hash(doc in document(), target in target()) {
        let mut stripped = doc.clone();
        stripped.blocked_paths.clear();
        prop_assert_eq!(
            compile(&doc, &target).hashes.dns,
            compile(&stripped, &target).hashes.dns
        );
    }
}
