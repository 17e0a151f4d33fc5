//! Iterative resolution against a scripted hierarchy

mod common;

use common::*;
use rootwalk::{
    cache::QueryCache,
    dns::{enums::DNSResourceType, resource::DNSResource},
    error::DnsError,
    resolver::{IterativeResolver, ResolutionStatus},
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const ROOT_A: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);
const ROOT_B: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 2);
const ROOT_C: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 3);
const COM: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
const NET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 20);
const EXAMPLE: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 30);

fn resolver(mock: &Arc<MockTransport>, roots: &[Ipv4Addr]) -> IterativeResolver {
    IterativeResolver::new(test_config(roots), mock.clone(), Arc::new(QueryCache::new()))
}

/// Root refers `name` to the com servers, which refer it to example.com
fn delegate_example(mock: &MockTransport, root: Ipv4Addr, name: &str, qtype: DNSResourceType) {
    mock.on(
        root,
        name,
        qtype,
        referral(name, qtype, "com", &[("a.gtld-servers.net", Some(COM))]),
    );
    mock.on(
        COM,
        name,
        qtype,
        referral(name, qtype, "example.com", &[("ns1.example.com", Some(EXAMPLE))]),
    );
}

#[tokio::test]
async fn test_resolves_through_referrals() {
    let mock = Arc::new(MockTransport::new());
    delegate_example(&mock, ROOT_A, "www.example.com", DNSResourceType::A);
    mock.on(
        EXAMPLE,
        "www.example.com",
        DNSResourceType::A,
        a_answer("www.example.com", Ipv4Addr::new(93, 184, 216, 34)),
    );

    let result = resolver(&mock, &[ROOT_A])
        .resolve("WWW.Example.COM", DNSResourceType::A)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Answered);
    assert_eq!(result.qname, "www.example.com.");
    assert!(result.cname_chain.is_empty());
    assert_eq!(result.addresses(), vec![Ipv4Addr::new(93, 184, 216, 34)]);

    let servers: Vec<_> = mock.queries().into_iter().map(|q| q.server).collect();
    assert_eq!(servers, vec![server(ROOT_A), server(COM), server(EXAMPLE)]);
    assert!(mock.queries().iter().all(|q| !q.dnssec));
}

#[tokio::test]
async fn test_resolves_mx_and_ns() {
    let mock = Arc::new(MockTransport::new());
    delegate_example(&mock, ROOT_A, "example.com", DNSResourceType::MX);
    mock.on(
        EXAMPLE,
        "example.com",
        DNSResourceType::MX,
        answer(
            "example.com",
            DNSResourceType::MX,
            vec![DNSResource::new(
                "example.com",
                3600,
                rootwalk::dns::resource::RData::MX {
                    preference: 10,
                    exchange: "mail.example.com.".to_string(),
                },
            )],
        ),
    );

    let result = resolver(&mock, &[ROOT_A])
        .resolve("example.com", DNSResourceType::MX)
        .await
        .unwrap();
    assert!(result.is_answered());
    let rows: Vec<String> = result.answer_records().map(|rr| rr.rdata_text()).collect();
    assert_eq!(rows, vec!["10 mail.example.com.".to_string()]);
}

#[tokio::test]
async fn test_follows_cname_chain() {
    let mock = Arc::new(MockTransport::new());
    for name in ["a.example.com", "b.example.com", "c.example.com"] {
        delegate_example(&mock, ROOT_A, name, DNSResourceType::A);
    }
    mock.on(
        EXAMPLE,
        "a.example.com",
        DNSResourceType::A,
        answer("a.example.com", DNSResourceType::A, vec![cname("a.example.com", "b.example.com.")]),
    );
    mock.on(
        EXAMPLE,
        "b.example.com",
        DNSResourceType::A,
        answer("b.example.com", DNSResourceType::A, vec![cname("b.example.com", "c.example.com.")]),
    );
    mock.on(
        EXAMPLE,
        "c.example.com",
        DNSResourceType::A,
        a_answer("c.example.com", Ipv4Addr::new(192, 0, 2, 99)),
    );

    let result = resolver(&mock, &[ROOT_A])
        .resolve("a.example.com", DNSResourceType::A)
        .await
        .unwrap();

    assert!(result.is_answered());
    assert_eq!(result.qname, "a.example.com.");
    assert_eq!(
        result.cname_chain,
        vec!["b.example.com.".to_string(), "c.example.com.".to_string()]
    );
    assert_eq!(result.final_name(), "c.example.com.");
    assert_eq!(result.addresses(), vec![Ipv4Addr::new(192, 0, 2, 99)]);
}

#[tokio::test]
async fn test_cname_loop_hits_hop_limit() {
    let mock = Arc::new(MockTransport::new());
    for name in ["a.example.com", "b.example.com"] {
        delegate_example(&mock, ROOT_A, name, DNSResourceType::A);
    }
    mock.on(
        EXAMPLE,
        "a.example.com",
        DNSResourceType::A,
        answer("a.example.com", DNSResourceType::A, vec![cname("a.example.com", "b.example.com.")]),
    );
    mock.on(
        EXAMPLE,
        "b.example.com",
        DNSResourceType::A,
        answer("b.example.com", DNSResourceType::A, vec![cname("b.example.com", "a.example.com.")]),
    );

    let err = resolver(&mock, &[ROOT_A])
        .resolve("a.example.com", DNSResourceType::A)
        .await
        .unwrap_err();
    assert!(matches!(err, DnsError::CnameLimitExceeded(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_falls_back_to_next_root_on_timeout() {
    let mock = Arc::new(MockTransport::new());
    mock.silence(ROOT_A);
    delegate_example(&mock, ROOT_B, "www.example.com", DNSResourceType::A);
    mock.on(
        EXAMPLE,
        "www.example.com",
        DNSResourceType::A,
        a_answer("www.example.com", Ipv4Addr::new(192, 0, 2, 80)),
    );

    let roots = [ROOT_A, ROOT_B, ROOT_C];
    let result = resolver(&mock, &roots)
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap();

    assert!(result.is_answered());
    assert_eq!(mock.queries_to(ROOT_A), 1);
    assert_eq!(mock.queries_to(ROOT_B), 1);
    assert_eq!(mock.queries_to(ROOT_C), 0);
    let root_attempts: usize = roots.iter().map(|r| mock.queries_to(*r)).sum();
    assert!(root_attempts <= roots.len());
}

#[tokio::test]
async fn test_all_roots_failing_is_an_error() {
    let mock = Arc::new(MockTransport::new());
    let roots = [ROOT_A, ROOT_B, ROOT_C];
    for root in roots {
        mock.silence(root);
    }

    let err = resolver(&mock, &roots)
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap_err();

    match err {
        DnsError::ResolutionFailed {
            name,
            qtype,
            roots_tried,
        } => {
            assert_eq!(name, "www.example.com.");
            assert_eq!(qtype, DNSResourceType::A);
            assert_eq!(roots_tried, 3);
        }
        other => panic!("unexpected error {:?}", other),
    }
    for root in roots {
        assert_eq!(mock.queries_to(root), 1);
    }
}

#[tokio::test]
async fn test_root_without_glue_moves_on() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        ROOT_A,
        "www.example.com",
        DNSResourceType::A,
        referral("www.example.com", DNSResourceType::A, "com", &[("a.gtld-servers.net", None)]),
    );
    delegate_example(&mock, ROOT_B, "www.example.com", DNSResourceType::A);
    mock.on(
        EXAMPLE,
        "www.example.com",
        DNSResourceType::A,
        a_answer("www.example.com", Ipv4Addr::new(192, 0, 2, 81)),
    );

    let result = resolver(&mock, &[ROOT_A, ROOT_B])
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap();
    assert_eq!(result.addresses(), vec![Ipv4Addr::new(192, 0, 2, 81)]);
    // No glue lookup was attempted for the root's name server
    assert!(mock.queries().iter().all(|q| q.name != "a.gtld-servers.net."));
}

#[tokio::test]
async fn test_unexpected_answer_tries_next_root() {
    let mock = Arc::new(MockTransport::new());
    let other_tld = Ipv4Addr::new(192, 0, 2, 11);
    mock.on(
        ROOT_A,
        "www.example.com",
        DNSResourceType::A,
        referral("www.example.com", DNSResourceType::A, "com", &[("b.gtld-servers.net", Some(other_tld))]),
    );
    mock.on(
        other_tld,
        "www.example.com",
        DNSResourceType::A,
        answer(
            "www.example.com",
            DNSResourceType::A,
            vec![DNSResource::new(
                "www.example.com",
                300,
                rootwalk::dns::resource::RData::NS("ns.example.com.".to_string()),
            )],
        ),
    );
    delegate_example(&mock, ROOT_B, "www.example.com", DNSResourceType::A);
    mock.on(
        EXAMPLE,
        "www.example.com",
        DNSResourceType::A,
        a_answer("www.example.com", Ipv4Addr::new(192, 0, 2, 82)),
    );

    let result = resolver(&mock, &[ROOT_A, ROOT_B])
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap();
    assert_eq!(result.addresses(), vec![Ipv4Addr::new(192, 0, 2, 82)]);
    assert_eq!(mock.queries_to(ROOT_B), 1);
}

#[tokio::test]
async fn test_glue_candidates_tried_in_order() {
    let mock = Arc::new(MockTransport::new());
    let dead = Ipv4Addr::new(192, 0, 2, 12);
    mock.silence(dead);
    mock.on(
        ROOT_A,
        "www.example.com",
        DNSResourceType::A,
        referral(
            "www.example.com",
            DNSResourceType::A,
            "com",
            &[("a.gtld-servers.net", Some(dead)), ("b.gtld-servers.net", Some(COM))],
        ),
    );
    mock.on(
        COM,
        "www.example.com",
        DNSResourceType::A,
        referral("www.example.com", DNSResourceType::A, "example.com", &[("ns1.example.com", Some(EXAMPLE))]),
    );
    mock.on(
        EXAMPLE,
        "www.example.com",
        DNSResourceType::A,
        a_answer("www.example.com", Ipv4Addr::new(192, 0, 2, 83)),
    );

    let result = resolver(&mock, &[ROOT_A])
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap();
    assert!(result.is_answered());
    assert_eq!(mock.queries_to(dead), 1);
    assert_eq!(mock.queries_to(COM), 1);
}

/// Scripts a referral without glue to three name servers under net, each
/// of which can answer for `name`
fn script_glueless(mock: &MockTransport, name: &str) -> Vec<Ipv4Addr> {
    let ns_names = ["ns1.dns-a.net", "ns1.dns-b.net", "ns1.dns-c.net"];
    let mut auth_servers = Vec::new();

    mock.on(
        ROOT_A,
        name,
        DNSResourceType::A,
        referral(name, DNSResourceType::A, "com", &[("a.gtld-servers.net", Some(COM))]),
    );
    let servers: Vec<(&str, Option<Ipv4Addr>)> = ns_names.iter().map(|ns| (*ns, None)).collect();
    mock.on(COM, name, DNSResourceType::A, referral(name, DNSResourceType::A, "example.com", &servers));

    for (i, ns) in ns_names.iter().enumerate() {
        let ip = Ipv4Addr::new(203, 0, 113, 1 + i as u8);
        auth_servers.push(ip);
        mock.on(
            ROOT_A,
            ns,
            DNSResourceType::A,
            referral(ns, DNSResourceType::A, "net", &[("a.gtld-servers.net", Some(NET))]),
        );
        mock.on(NET, ns, DNSResourceType::A, a_answer(ns, ip));
        mock.on(ip, name, DNSResourceType::A, a_answer(name, Ipv4Addr::new(192, 0, 2, 84)));
    }
    auth_servers
}

#[tokio::test]
async fn test_resolves_name_server_without_glue() {
    let mock = Arc::new(MockTransport::new());
    let auth_servers = script_glueless(&mock, "www.example.com");

    let result = resolver(&mock, &[ROOT_A])
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap();

    assert!(result.is_answered());
    assert_eq!(result.addresses(), vec![Ipv4Addr::new(192, 0, 2, 84)]);
    let asked: usize = auth_servers.iter().map(|ip| mock.queries_to(*ip)).sum();
    assert_eq!(asked, 1);
}

#[tokio::test]
async fn test_name_server_tie_break_stays_in_authority() {
    let mut picked = std::collections::HashSet::new();

    for seed in 0..24 {
        let mock = Arc::new(MockTransport::new());
        let auth_servers = script_glueless(&mock, "www.example.com");
        let mut config = test_config(&[ROOT_A]);
        config.rng_seed = Some(seed);
        let resolver = IterativeResolver::new(config, mock.clone(), Arc::new(QueryCache::new()));

        let result = resolver
            .resolve("www.example.com", DNSResourceType::A)
            .await
            .unwrap();
        assert_eq!(result.addresses(), vec![Ipv4Addr::new(192, 0, 2, 84)]);

        let used: Vec<_> = auth_servers
            .iter()
            .filter(|ip| mock.queries_to(**ip) > 0)
            .collect();
        assert_eq!(used.len(), 1);
        picked.insert(*used[0]);
    }

    assert!(picked.len() > 1, "tie-break never varied: {:?}", picked);
}

#[tokio::test]
async fn test_glue_depth_limit() {
    let mock = Arc::new(MockTransport::new());
    script_glueless(&mock, "www.example.com");
    let mut config = test_config(&[ROOT_A]);
    config.max_glue_depth = 0;
    let resolver = IterativeResolver::new(config, mock.clone(), Arc::new(QueryCache::new()));

    let err = resolver
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap_err();
    assert!(matches!(err, DnsError::ResolutionFailed { .. }), "got {:?}", err);
    assert!(mock.queries().iter().all(|q| !q.name.ends_with("net.")));
}

/// Every root refers both `www.example.com` and `ns1.loop.net` to the
/// com servers, which answer both with a glueless referral to ns1.loop.net
fn script_self_referencing_ns(mock: &MockTransport, roots: &[Ipv4Addr]) {
    for name in ["www.example.com", "ns1.loop.net"] {
        for root in roots {
            mock.on(
                *root,
                name,
                DNSResourceType::A,
                referral(name, DNSResourceType::A, "com", &[("a.gtld-servers.net", Some(COM))]),
            );
        }
        mock.on(
            COM,
            name,
            DNSResourceType::A,
            referral(name, DNSResourceType::A, "example.com", &[("ns1.loop.net", None)]),
        );
    }
}

#[tokio::test]
async fn test_self_referencing_name_server_stays_bounded() {
    let roots: Vec<Ipv4Addr> = (1..=13).map(|i| Ipv4Addr::new(198, 51, 100, i)).collect();
    let mock = Arc::new(MockTransport::new());
    script_self_referencing_ns(&mock, &roots);
    let mut config = test_config(&roots);
    config.enable_caching = true;
    let resolver = IterativeResolver::new(config, mock.clone(), Arc::new(QueryCache::new()));

    let err = resolver
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap_err();
    assert!(matches!(err, DnsError::ResolutionFailed { roots_tried: 13, .. }), "got {:?}", err);

    // ns1.loop.net is swept over the roots once, then never again
    let ns_lookups = mock
        .queries()
        .iter()
        .filter(|q| q.name == "ns1.loop.net." && roots.iter().any(|ip| q.server == server(*ip)))
        .count();
    assert_eq!(ns_lookups, roots.len());
    assert!(mock.query_count() <= 4 * roots.len(), "sent {} queries", mock.query_count());
}

#[tokio::test]
async fn test_failed_name_server_lookup_is_not_repeated() {
    let roots = [ROOT_A, ROOT_B, ROOT_C];
    let mock = Arc::new(MockTransport::new());
    for root in roots {
        mock.on(
            root,
            "www.example.com",
            DNSResourceType::A,
            referral("www.example.com", DNSResourceType::A, "com", &[("a.gtld-servers.net", Some(COM))]),
        );
        mock.on(
            root,
            "ns1.dead.net",
            DNSResourceType::A,
            referral("ns1.dead.net", DNSResourceType::A, "net", &[("a.gtld-servers.net", Some(NET))]),
        );
    }
    mock.on(
        COM,
        "www.example.com",
        DNSResourceType::A,
        referral("www.example.com", DNSResourceType::A, "example.com", &[("ns1.dead.net", None)]),
    );
    mock.silence(NET);

    let err = resolver(&mock, &roots)
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap_err();
    assert!(matches!(err, DnsError::ResolutionFailed { .. }), "got {:?}", err);

    assert_eq!(mock.queries_to(NET), roots.len());
    assert_eq!(mock.queries_to(COM), roots.len());
    assert_eq!(mock.query_count(), 12);
}

#[tokio::test]
async fn test_invalid_delegation_name_is_unresolved() {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        ROOT_A,
        "www.example.com",
        DNSResourceType::A,
        referral("www.example.com", DNSResourceType::A, "com", &[("a.gtld-servers.net", Some(COM))]),
    );
    let dead_end = referral(
        "www.example.com",
        DNSResourceType::A,
        "example.com",
        &[("bad_name.example.com", None)],
    );
    mock.on(COM, "www.example.com", DNSResourceType::A, dead_end.clone());

    let result = resolver(&mock, &[ROOT_A, ROOT_B])
        .resolve("www.example.com", DNSResourceType::A)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Unresolved);
    assert!(result.response.answers.is_empty());
    assert_eq!(result.response.authorities, dead_end.authorities);
    // The walk ends there instead of trying another root
    assert_eq!(mock.queries_to(ROOT_B), 0);
}

#[tokio::test]
async fn test_name_error_is_unresolved() {
    let mock = Arc::new(MockTransport::new());
    delegate_example(&mock, ROOT_A, "missing.example.com", DNSResourceType::A);
    mock.on(
        EXAMPLE,
        "missing.example.com",
        DNSResourceType::A,
        nxdomain("missing.example.com", DNSResourceType::A, "example.com."),
    );

    let result = resolver(&mock, &[ROOT_A, ROOT_B])
        .resolve("missing.example.com", DNSResourceType::A)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Unresolved);
    assert_eq!(result.response.header.rcode, 3);
    assert!(result.addresses().is_empty());
    assert_eq!(mock.queries_to(ROOT_B), 0);
}

#[tokio::test]
async fn test_repeat_resolution_is_identical() {
    let mock = Arc::new(MockTransport::new());
    script_glueless(&mock, "www.example.com");
    let resolver = resolver(&mock, &[ROOT_A]);

    let first = resolver.resolve("www.example.com", DNSResourceType::A).await.unwrap();
    let sent = mock.query_count();
    let second = resolver.resolve("www.example.com", DNSResourceType::A).await.unwrap();

    assert_eq!(first.addresses(), second.addresses());
    assert_eq!(first.response.answers, second.response.answers);
    assert_eq!(first.status, second.status);
    // Caching is off: the second run walked the hierarchy again
    assert!(mock.query_count() > sent);
}

#[tokio::test]
async fn test_cache_short_circuits_repeat_queries() {
    let mock = Arc::new(MockTransport::new());
    delegate_example(&mock, ROOT_A, "www.example.com", DNSResourceType::A);
    mock.on(
        EXAMPLE,
        "www.example.com",
        DNSResourceType::A,
        a_answer("www.example.com", Ipv4Addr::new(192, 0, 2, 85)),
    );
    let cache = Arc::new(QueryCache::new());
    let mut config = test_config(&[ROOT_A]);
    config.enable_caching = true;
    let resolver = IterativeResolver::new(config, mock.clone(), cache.clone());

    let first = resolver.resolve("www.example.com", DNSResourceType::A).await.unwrap();
    let sent = mock.query_count();
    let second = resolver.resolve("WWW.EXAMPLE.COM.", DNSResourceType::A).await.unwrap();

    assert_eq!(mock.query_count(), sent);
    assert_eq!(first.response, second.response);
    assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
    assert_eq!(cache.len(), 1);

    assert!(cache.invalidate("www.example.com", DNSResourceType::A));
    let third = resolver.resolve("www.example.com", DNSResourceType::A).await.unwrap();
    assert!(mock.query_count() > sent);
    assert_eq!(first.addresses(), third.addresses());
}
