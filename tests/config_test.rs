use babbler::config::{BabblerConfig, load, load_from, validate};

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn default_config_has_sensible_values() {
    let config = BabblerConfig::default();
    assert_eq!(config.gateway.port, 7300);
    assert_eq!(config.gateway.bind, "127.0.0.1");
    assert_eq!(config.chain.end_sentence, ".!?");
    assert_eq!(config.chain.max_walk_steps, 50);
    assert_eq!(config.chain.max_sentences, 4);
    assert_eq!(config.chain.top_pairs, 3);
    assert_eq!(config.policy.anchors, vec!["babbler"]);
    assert_eq!(config.policy.default_reply_chance, 10);
    assert_eq!(config.store.backend, "memory");
    assert!(config.store.path.is_none());
    assert!(validate(&config).is_ok());
}

#[test]
fn valid_toml_parses_successfully() {
    let toml_str = r#"
[gateway]
port = 8080
bind = "0.0.0.0"

[chain]
end_sentence = ".!?…"
max_walk_steps = 20
max_sentences = 2
top_pairs = 5

[policy]
anchors = ["bot", "robot"]
default_reply_chance = 35

[store]
backend = "sqlite"
path = "/var/lib/babbler/chains.db"
"#;

    let config: BabblerConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.gateway.port, 8080);
    assert_eq!(config.gateway.bind, "0.0.0.0");
    assert_eq!(config.chain.end_sentence_chars(), vec!['.', '!', '?', '…']);
    assert_eq!(config.chain.max_walk_steps, 20);
    assert_eq!(config.chain.max_sentences, 2);
    assert_eq!(config.chain.top_pairs, 5);
    assert_eq!(config.policy.anchors, vec!["bot", "robot"]);
    assert_eq!(config.policy.default_reply_chance, 35);
    assert_eq!(config.store.backend, "sqlite");
    assert_eq!(
        config.store.resolved_path(),
        std::path::PathBuf::from("/var/lib/babbler/chains.db")
    );
    assert!(validate(&config).is_ok());
}

#[test]
fn partial_config_uses_defaults_for_missing_fields() {
    let config: BabblerConfig = toml::from_str("[chain]\nmax_sentences = 1\n").unwrap();
    assert_eq!(config.chain.max_sentences, 1);
    assert_eq!(config.chain.max_walk_steps, 50);
    assert_eq!(config.gateway.port, 7300);
    assert_eq!(config.policy.default_reply_chance, 10);
}

#[test]
fn default_sqlite_path_lives_in_state_dir() {
    let config: BabblerConfig = toml::from_str("[store]\nbackend = \"sqlite\"\n").unwrap();
    let path = config.store.resolved_path();
    assert!(path.ends_with(".babbler/babbler.db"), "{}", path.display());
}

#[test]
fn malformed_toml_is_reported_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "this is not valid toml {{{");

    let err = load_from(&path).unwrap_err().to_string();
    assert!(err.contains("invalid config"), "{err}");
    assert!(err.contains("config.toml"), "{err}");
}

#[test]
fn validate_rejects_out_of_range_values() {
    let cases = [
        ("[chain]\nend_sentence = \"\"\n", "end_sentence"),
        ("[chain]\nmax_walk_steps = 0\n", "max_walk_steps"),
        ("[chain]\nmax_sentences = 0\n", "max_sentences"),
        ("[chain]\ntop_pairs = 0\n", "top_pairs"),
        ("[policy]\ndefault_reply_chance = 101\n", "default_reply_chance"),
        ("[policy]\nanchors = [\"ok\", \"\"]\n", "anchors[1]"),
        ("[store]\nbackend = \"redis\"\n", "redis"),
    ];

    for (body, needle) in cases {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, body);
        let err = load_from(&path).unwrap_err().to_string();
        assert!(err.contains(needle), "expected {needle:?} in {err:?}");
    }
}

#[test]
fn load_from_reads_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[gateway]\nport = 9999\n");

    let config = load_from(&path).unwrap();
    assert_eq!(config.gateway.port, 9999);
}

#[test]
fn config_env_var_selects_file_or_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[policy]\ndefault_reply_chance = 42\n");

    // SAFETY: the only test in this binary that touches the environment
    unsafe {
        std::env::set_var("BABBLER_CONFIG", &path);
    }
    let from_file = load();
    unsafe {
        std::env::set_var("BABBLER_CONFIG", dir.path().join("missing.toml"));
    }
    let from_defaults = load();
    unsafe {
        std::env::remove_var("BABBLER_CONFIG");
    }

    assert_eq!(from_file.unwrap().policy.default_reply_chance, 42);
    assert_eq!(from_defaults.unwrap().policy.default_reply_chance, 10);
}
