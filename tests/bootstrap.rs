use openssl::x509::X509;
use pki_bootstrap::certificate_authority::RootCaBuilder;
use pki_bootstrap::configs::{BootstrapConfig, RegenerationPolicy, ServiceSpec};
use pki_bootstrap::leaf_issuer::SubjectAltNameSet;
use pki_bootstrap::{BootstrapError, BootstrapReport, Bootstrapper};
use std::net::IpAddr;
use std::path::Path;

fn small_config() -> BootstrapConfig {
    let mut config = BootstrapConfig::default();
    config.certificate_authority.key_bits = 2048;
    config.leaf.key_bits = 1024;
    config
}

fn backend_only() -> BootstrapConfig {
    let mut config = small_config();
    config.services = vec![ServiceSpec::new(
        "backend",
        &["backend", "localhost"],
        &[IpAddr::from([127, 0, 0, 1])],
    )];
    config
}

fn read_cert(path: &Path) -> X509 {
    X509::from_pem(&std::fs::read(path).unwrap()).unwrap()
}

fn env_value(root: &Path, key: &str) -> String {
    let text = std::fs::read_to_string(root.join(".env")).unwrap();
    let prefix = format!("{}=", key);
    text.lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .unwrap()
        .to_string()
}

#[cfg(unix)]
fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[test]
fn backend_service_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    Bootstrapper::new(backend_only(), dir.path())
        .unwrap()
        .run()
        .unwrap();

    let certs = dir.path().join("certs");
    for file in [
        "ca/ca.key",
        "ca/ca.crt",
        "ca/ca.srl",
        "backend/backend.key",
        "backend/backend.crt",
    ] {
        assert!(certs.join(file).exists(), "missing {}", file);
    }

    #[cfg(unix)]
    {
        assert_eq!(mode(&certs.join("ca/ca.key")), 0o600);
        assert_eq!(mode(&certs.join("backend/backend.key")), 0o600);
        assert_eq!(mode(&dir.path().join(".env")), 0o600);
    }

    let ca = read_cert(&certs.join("ca/ca.crt"));
    let leaf = read_cert(&certs.join("backend/backend.crt"));

    let sans = SubjectAltNameSet::from_certificate(&leaf).unwrap();
    assert_eq!(
        sans.entries(),
        ["DNS:backend", "DNS:localhost", "IP:127.0.0.1"]
    );

    let ca_key = ca.public_key().unwrap();
    assert!(leaf.verify(&ca_key).unwrap());
    assert_eq!(
        leaf.issuer_name().try_cmp(ca.subject_name()).unwrap(),
        std::cmp::Ordering::Equal
    );
}

#[test]
fn root_ca_is_self_signed() {
    let dir = tempfile::tempdir().unwrap();
    Bootstrapper::new(backend_only(), dir.path())
        .unwrap()
        .run()
        .unwrap();

    let ca = read_cert(&dir.path().join("certs/ca/ca.crt"));
    assert_eq!(
        ca.issuer_name().try_cmp(ca.subject_name()).unwrap(),
        std::cmp::Ordering::Equal
    );
    assert!(ca.verify(&ca.public_key().unwrap()).unwrap());
}

#[test]
fn leaf_does_not_verify_against_unrelated_ca() {
    let dir = tempfile::tempdir().unwrap();
    Bootstrapper::new(backend_only(), dir.path())
        .unwrap()
        .run()
        .unwrap();

    let (_, other) = RootCaBuilder::new().key_bits(2048).build().unwrap();
    let leaf = read_cert(&dir.path().join("certs/backend/backend.crt"));
    assert!(!leaf.verify(&other.public_key().unwrap()).unwrap_or(false));
}

#[test]
fn default_services_include_database_aliases() {
    let dir = tempfile::tempdir().unwrap();
    let report = Bootstrapper::new(small_config(), dir.path())
        .unwrap()
        .run()
        .unwrap();

    let names: Vec<_> = report.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["backend", "frontend", "postgres"]);

    let pg = dir.path().join("certs/postgres");
    let read = |name: &str| std::fs::read(pg.join(name)).unwrap();
    assert_eq!(read("server.crt"), read("postgres.crt"));
    assert_eq!(read("server.key"), read("postgres.key"));
    assert_eq!(
        read("ca.crt"),
        std::fs::read(dir.path().join("certs/ca/ca.crt")).unwrap()
    );

    // every leaf carries a distinct serial
    let mut serials: Vec<_> = names
        .iter()
        .map(|name| {
            let cert = read_cert(&dir.path().join(format!("certs/{0}/{0}.crt", name)));
            cert.serial_number().to_bn().unwrap().to_hex_str().unwrap().to_string()
        })
        .collect();
    serials.sort();
    serials.dedup();
    assert_eq!(serials.len(), 3);
}

#[test]
fn independent_runs_produce_distinct_secrets() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    for dir in [&first, &second] {
        Bootstrapper::new(backend_only(), dir.path())
            .unwrap()
            .run()
            .unwrap();
    }

    let a = env_value(first.path(), "JWT_SECRET");
    let b = env_value(second.path(), "JWT_SECRET");
    for secret in [&a, &b] {
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }
    assert_ne!(a, b);

    assert_eq!(env_value(first.path(), "ADMIN_PASSWORD").len(), 20);
    assert_eq!(env_value(first.path(), "DB_PASSWORD").len(), 32);
}

#[test]
fn reuse_valid_keeps_existing_material() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = backend_only();
    config.policy.regeneration = RegenerationPolicy::ReuseValid;

    Bootstrapper::new(config.clone(), dir.path())
        .unwrap()
        .run()
        .unwrap();
    let ca_before = std::fs::read(dir.path().join("certs/ca/ca.crt")).unwrap();
    let leaf_before = std::fs::read(dir.path().join("certs/backend/backend.crt")).unwrap();
    let jwt_before = env_value(dir.path(), "JWT_SECRET");

    let report = Bootstrapper::new(config, dir.path())
        .unwrap()
        .run()
        .unwrap();
    assert!(report.ca.reused);
    assert!(report.services[0].reused);
    assert!(!report.env.written);
    assert_eq!(
        std::fs::read(dir.path().join("certs/ca/ca.crt")).unwrap(),
        ca_before
    );
    assert_eq!(
        std::fs::read(dir.path().join("certs/backend/backend.crt")).unwrap(),
        leaf_before
    );
    assert_eq!(env_value(dir.path(), "JWT_SECRET"), jwt_before);
}

fn reuse_config() -> BootstrapConfig {
    let mut config = backend_only();
    config.policy.regeneration = RegenerationPolicy::ReuseValid;
    config
}

fn run(config: BootstrapConfig, root: &Path) -> BootstrapReport {
    Bootstrapper::new(config, root).unwrap().run().unwrap()
}

fn assert_backend_chains_to_ca(root: &Path) {
    let ca = read_cert(&root.join("certs/ca/ca.crt"));
    let leaf = read_cert(&root.join("certs/backend/backend.crt"));
    assert!(leaf.verify(&ca.public_key().unwrap()).unwrap());
}

#[cfg(unix)]
#[test]
fn reuse_valid_restores_owner_only_key_modes() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());

    let ca_key = dir.path().join("certs/ca/ca.key");
    let leaf_key = dir.path().join("certs/backend/backend.key");
    for key in [&ca_key, &leaf_key] {
        std::fs::set_permissions(key, std::fs::Permissions::from_mode(0o644)).unwrap();
    }

    let report = run(reuse_config(), dir.path());
    assert!(report.ca.reused);
    assert!(report.services[0].reused);
    assert_eq!(mode(&ca_key), 0o600);
    assert_eq!(mode(&leaf_key), 0o600);
}

#[test]
fn reuse_valid_replaces_corrupt_ca_certificate() {
    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());
    std::fs::write(dir.path().join("certs/ca/ca.crt"), b"garbage").unwrap();

    let report = run(reuse_config(), dir.path());
    assert!(!report.ca.reused);
    // the old leaf no longer chains to the new CA
    assert!(!report.services[0].reused);
    assert_backend_chains_to_ca(dir.path());
}

#[test]
fn reuse_valid_replaces_ca_with_foreign_key() {
    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());
    let (foreign, _) = RootCaBuilder::new().key_bits(2048).build().unwrap();
    foreign.persist(&dir.path().join("certs/ca/ca.key")).unwrap();

    let report = run(reuse_config(), dir.path());
    assert!(!report.ca.reused);
    assert!(!report.services[0].reused);
    assert_backend_chains_to_ca(dir.path());
}

#[test]
fn reuse_valid_unparseable_ca_key_aborts() {
    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());
    std::fs::write(dir.path().join("certs/ca/ca.key"), b"garbage").unwrap();

    let result = Bootstrapper::new(reuse_config(), dir.path())
        .unwrap()
        .run();
    assert!(matches!(
        result,
        Err(BootstrapError::SigningKeyUnavailable { .. })
    ));
}

#[test]
fn reuse_valid_regenerates_leaves_under_new_ca() {
    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());
    let leaf_before = std::fs::read(dir.path().join("certs/backend/backend.crt")).unwrap();
    std::fs::remove_file(dir.path().join("certs/ca/ca.key")).unwrap();
    std::fs::remove_file(dir.path().join("certs/ca/ca.crt")).unwrap();

    let report = run(reuse_config(), dir.path());
    assert!(!report.ca.reused);
    assert!(!report.services[0].reused);
    assert_ne!(
        std::fs::read(dir.path().join("certs/backend/backend.crt")).unwrap(),
        leaf_before
    );
    assert_backend_chains_to_ca(dir.path());
}

#[test]
fn reuse_valid_replaces_expired_ca() {
    let dir = tempfile::tempdir().unwrap();
    let ca_dir = dir.path().join("certs/ca");
    std::fs::create_dir_all(&ca_dir).unwrap();
    let (key, cert) = RootCaBuilder::new()
        .key_bits(2048)
        .validity_days(0)
        .build()
        .unwrap();
    key.persist(&ca_dir.join("ca.key")).unwrap();
    std::fs::write(ca_dir.join("ca.crt"), cert.to_pem().unwrap()).unwrap();

    let report = run(reuse_config(), dir.path());
    assert!(!report.ca.reused);
    assert_ne!(
        std::fs::read(ca_dir.join("ca.crt")).unwrap(),
        cert.to_pem().unwrap()
    );
    assert_backend_chains_to_ca(dir.path());
}

#[test]
fn reuse_valid_reissues_leaf_when_sans_change() {
    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());

    let mut config = reuse_config();
    config.services[0].dns.push("api.internal".to_string());
    let report = run(config, dir.path());
    assert!(report.ca.reused);
    assert!(!report.services[0].reused);

    let leaf = read_cert(&dir.path().join("certs/backend/backend.crt"));
    assert_eq!(
        SubjectAltNameSet::from_certificate(&leaf).unwrap().entries(),
        ["DNS:backend", "DNS:localhost", "DNS:api.internal", "IP:127.0.0.1"]
    );
    assert_backend_chains_to_ca(dir.path());
}

#[test]
fn reuse_valid_replaces_corrupt_leaf_certificate() {
    let dir = tempfile::tempdir().unwrap();
    run(reuse_config(), dir.path());
    std::fs::write(dir.path().join("certs/backend/backend.crt"), b"garbage").unwrap();

    let report = run(reuse_config(), dir.path());
    assert!(report.ca.reused);
    assert!(!report.services[0].reused);
    assert_backend_chains_to_ca(dir.path());
}

#[test]
fn always_policy_regenerates_everything() {
    let dir = tempfile::tempdir().unwrap();
    Bootstrapper::new(backend_only(), dir.path())
        .unwrap()
        .run()
        .unwrap();
    let ca_before = std::fs::read(dir.path().join("certs/ca/ca.crt")).unwrap();
    let jwt_before = env_value(dir.path(), "JWT_SECRET");

    let report = Bootstrapper::new(backend_only(), dir.path())
        .unwrap()
        .run()
        .unwrap();
    assert!(!report.ca.reused);
    assert!(report.env.written);
    assert_ne!(
        std::fs::read(dir.path().join("certs/ca/ca.crt")).unwrap(),
        ca_before
    );
    assert_ne!(env_value(dir.path(), "JWT_SECRET"), jwt_before);

    // the fresh leaf chains to the fresh CA
    let ca = read_cert(&dir.path().join("certs/ca/ca.crt"));
    let leaf = read_cert(&dir.path().join("certs/backend/backend.crt"));
    assert!(leaf.verify(&ca.public_key().unwrap()).unwrap());
}

#[test]
fn config_file_overrides_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = BootstrapConfig::from_toml_str(
        r#"
        [certificate_authority]
        common_name = "Test-CA"
        key_bits = 2048

        [leaf]
        key_bits = 1024

        [[services]]
        name = "api"
        dns = ["api.internal"]
        ip = ["10.0.0.5"]
        "#,
    )
    .unwrap();

    let report = Bootstrapper::new(config, dir.path())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.services.len(), 1);

    let ca = read_cert(&dir.path().join("certs/ca/ca.crt"));
    let cn = ca
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap()
        .to_string();
    assert_eq!(cn, "Test-CA");

    let leaf = read_cert(&dir.path().join("certs/api/api.crt"));
    let sans = SubjectAltNameSet::from_certificate(&leaf).unwrap();
    assert_eq!(sans.entries(), ["DNS:api.internal", "IP:10.0.0.5"]);
}
