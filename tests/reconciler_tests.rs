mod common;

use common::{Harness, config_input, credential};
use vpnmux::VpnmuxError;
use vpnmux::db::models::{ClientInput, NetworkInput};
use vpnmux::runtime::ContainerRuntime;

fn network_input(name: &str, config_id: &str) -> NetworkInput {
    NetworkInput {
        name: name.to_string(),
        config_id: config_id.to_string(),
    }
}

fn client_input(name: &str, address: &str) -> ClientInput {
    ClientInput {
        name: name.to_string(),
        address: address.to_string(),
    }
}

#[tokio::test]
async fn network_tunnel_routes_through_its_container() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let input = config_input(&r, "vpn.example.net").await;
    let cfg = r.configs.create(input).await.unwrap();
    assert!(h.settings.openvpn_dir.join(&cfg.id).join("openvpn.conf").exists());

    let status = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();
    assert!(status.tunnel.running);
    assert_eq!(h.runtime.container_count().await, 1);
    assert_eq!(h.runtime.network_count().await, 1);
    assert_eq!(
        h.host.default_routes(status.tunnel.route_table),
        vec![status.tunnel.address.to_string()]
    );
}

#[tokio::test]
async fn client_assignment_lifecycle_keeps_the_guard() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let client = r.clients.create(client_input("laptop", "10.0.0.5")).await.unwrap();
    assert_eq!(h.guard_rules("10.0.0.5"), 1);

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let network = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();

    let status = r
        .assignments
        .assign(&client.id, &network.network.id)
        .await
        .unwrap();
    assert_eq!(status.route_table, network.tunnel.route_table);
    assert_eq!(
        h.host.source_rules("10.0.0.5"),
        vec![network.tunnel.route_table.to_string()]
    );

    r.assignments.unassign(&client.id).await.unwrap();
    assert!(h.host.source_rules("10.0.0.5").is_empty());
    assert_eq!(h.guard_rules("10.0.0.5"), 1);
}

#[tokio::test]
async fn reassignment_moves_the_single_rule() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let first = r.networks.create(network_input("a", &cfg.id)).await.unwrap();
    let second = r.networks.create(network_input("b", &cfg.id)).await.unwrap();
    assert_ne!(first.tunnel.route_table, second.tunnel.route_table);

    let client = r.clients.create(client_input("tv", "10.0.0.9")).await.unwrap();
    r.assignments.assign(&client.id, &first.network.id).await.unwrap();
    r.assignments.assign(&client.id, &second.network.id).await.unwrap();

    assert_eq!(
        h.host.source_rules("10.0.0.9"),
        vec![second.tunnel.route_table.to_string()]
    );
    assert_eq!(r.assignments.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn deletes_follow_dependency_order() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let input = config_input(&r, "vpn.example.net").await;
    let user_cred = input.user_cred.clone();
    let cfg = r.configs.create(input).await.unwrap();
    let network = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();

    let err = r.configs.delete(&cfg.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { kind: "config", .. }));
    let err = r.delete_credential(&user_cred).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { kind: "credential", .. }));

    r.networks.delete(&network.network.id).await.unwrap();
    assert_eq!(h.runtime.container_count().await, 0);
    assert_eq!(h.runtime.network_count().await, 0);
    assert!(h.host.default_routes(network.tunnel.route_table).is_empty());

    r.configs.delete(&cfg.id).await.unwrap();
    assert!(!h.settings.openvpn_dir.join(&cfg.id).exists());
    r.delete_credential(&user_cred).await.unwrap();

    let err = r.configs.delete(&cfg.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn assigned_client_and_dns_network_are_guarded() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let network = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();
    let client = r.clients.create(client_input("phone", "10.0.0.7")).await.unwrap();
    r.assignments.assign(&client.id, &network.network.id).await.unwrap();

    let err = r.clients.delete(&client.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { kind: "client", .. }));
    let err = r.networks.delete(&network.network.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { kind: "network", .. }));

    r.assignments.unassign(&client.id).await.unwrap();
    r.dns.set(&network.network.id).await.unwrap();
    let err = r.networks.delete(&network.network.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { kind: "network", .. }));

    r.dns.clear().await.unwrap();
    r.networks.delete(&network.network.id).await.unwrap();
    r.clients.delete(&client.id).await.unwrap();
    assert_eq!(h.guard_rules("10.0.0.7"), 0);
}

#[tokio::test]
async fn dns_route_follows_the_chosen_network() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    assert!(r.dns.get().await.unwrap_err().is_not_found());
    assert!(r.dns.clear().await.unwrap_err().is_not_found());

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let a = r.networks.create(network_input("a", &cfg.id)).await.unwrap();
    let b = r.networks.create(network_input("b", &cfg.id)).await.unwrap();

    let first = r.dns.set(&a.network.id).await.unwrap();
    assert_eq!(first.gateway, a.tunnel.address);
    let second = r.dns.set(&b.network.id).await.unwrap();
    assert_eq!(second.gateway, b.tunnel.address);
    assert_eq!(second.route_table, first.route_table);
    assert_eq!(h.host.fwmark_rules("0x1"), vec![second.route_table.to_string()]);
    assert_eq!(
        h.host.default_routes(second.route_table),
        vec![b.tunnel.address.to_string()]
    );

    r.dns.clear().await.unwrap();
    assert!(h.host.fwmark_rules("0x1").is_empty());
    assert!(h.host.default_routes(second.route_table).is_empty());
}

#[tokio::test]
async fn restart_recovers_every_entity() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let mut tables = Vec::new();
    for name in ["a", "b", "c"] {
        let status = r.networks.create(network_input(name, &cfg.id)).await.unwrap();
        tables.push((status.network.id, status.tunnel.route_table));
    }
    let client = r.clients.create(client_input("laptop", "10.0.0.5")).await.unwrap();
    r.assignments.assign(&client.id, &tables[1].0).await.unwrap();
    r.dns.set(&tables[2].0).await.unwrap();

    // kernel state drifts while the process is down
    std::fs::remove_dir_all(h.settings.openvpn_dir.join(&cfg.id)).unwrap();
    h.host.set_default_route(tables[0].1, "192.0.2.1");
    h.host.add_source_rule("10.0.0.5", tables[0].1);
    drop(r);

    let restarted = h.reconciler();
    restarted.startup().await.unwrap();

    for (id, table) in &tables {
        let status = restarted.networks.check(id).await.unwrap();
        assert_eq!(status.tunnel.route_table, *table);
        assert_eq!(
            h.host.default_routes(*table),
            vec![status.tunnel.address.to_string()]
        );
    }
    assert!(h.settings.openvpn_dir.join(&cfg.id).join("creds").exists());
    assert_eq!(h.host.source_rules("10.0.0.5"), vec![tables[1].1.to_string()]);
    assert_eq!(restarted.dns.get().await.unwrap().network_id, tables[2].0);
}

#[tokio::test]
async fn startup_fails_when_a_network_lost_its_tunnel() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let status = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();
    h.runtime.drop_container(&status.tunnel.container_id).await;

    let err = h.reconciler().startup().await.unwrap_err();
    assert!(matches!(err, VpnmuxError::Consistency(_)));
}

#[tokio::test]
async fn network_without_live_tunnel_is_inconsistent() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let cfg = r
        .configs
        .create(config_input(&r, "vpn.example.net").await)
        .await
        .unwrap();
    let status = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();
    h.runtime
        .remove_container(&status.tunnel.container_id)
        .await
        .unwrap();
    h.runtime
        .remove_network(&status.tunnel.network_id)
        .await
        .unwrap();

    let err = r.networks.check(&status.network.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::Consistency(_)));
    let err = r.networks.delete(&status.network.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::Consistency(_)));
    let err = r.dns.set(&status.network.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::Consistency(_)));

    assert!(r.networks.check("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn startup_clears_rules_of_unassigned_clients() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();
    r.clients.create(client_input("stale", "10.0.0.8")).await.unwrap();

    h.host.add_source_rule("10.0.0.8", 7);
    h.reconciler().startup().await.unwrap();
    assert!(h.host.source_rules("10.0.0.8").is_empty());
}

#[tokio::test]
async fn updates_are_rejected_while_dependents_exist() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let input = config_input(&r, "vpn.example.net").await;
    let cfg = r.configs.create(input.clone()).await.unwrap();

    let mut renamed = input.clone();
    renamed.host = "vpn2.example.net".to_string();
    let updated = r.configs.update(&cfg.id, renamed.clone()).await.unwrap();
    assert_eq!(updated.host, "vpn2.example.net");
    let conf =
        std::fs::read_to_string(h.settings.openvpn_dir.join(&cfg.id).join("openvpn.conf"))
            .unwrap();
    assert!(conf.contains("remote vpn2.example.net 1194"));

    let network = r.networks.create(network_input("nl", &cfg.id)).await.unwrap();
    let err = r.configs.update(&cfg.id, renamed).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { .. }));
    let err = r.networks.update(&network.network.id).await.unwrap_err();
    assert!(matches!(err, VpnmuxError::Unsupported(_)));

    let err = r
        .update_credential(&input.pass_cred, credential("pass", "changed"))
        .await
        .unwrap_err();
    assert!(matches!(err, VpnmuxError::InUse { .. }));
}

#[tokio::test]
async fn client_readdress_moves_the_guard() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let client = r.clients.create(client_input("nas", "10.0.0.20")).await.unwrap();
    let err = r
        .clients
        .create(client_input("dup", "10.0.0.20"))
        .await
        .unwrap_err();
    assert!(matches!(err, VpnmuxError::Invalid(_)));
    let err = r
        .clients
        .create(client_input("bad", "not-an-ip"))
        .await
        .unwrap_err();
    assert!(matches!(err, VpnmuxError::Invalid(_)));

    r.clients
        .update(&client.id, client_input("nas", "10.0.0.21"))
        .await
        .unwrap();
    assert_eq!(h.guard_rules("10.0.0.20"), 0);
    assert_eq!(h.guard_rules("10.0.0.21"), 1);
}

#[tokio::test]
async fn config_requires_existing_credentials() {
    let h = Harness::new().await;
    let r = h.reconciler();
    r.startup().await.unwrap();

    let mut input = config_input(&r, "vpn.example.net").await;
    input.ca_cred = "missing".to_string();
    let err = r.configs.create(input).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(r.configs.list().await.unwrap().is_empty());
}
