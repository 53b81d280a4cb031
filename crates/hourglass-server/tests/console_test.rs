// Integration tests for the hourglass host
// Drives configuration, the plugin lifecycle, and the console together

use std::sync::Arc;

use clap::Parser;
use hourglass_engine::{CooldownGate, CooldownPlugin, PluginRegistry};
use hourglass_server::{
    Configuration,
    console::{Console, ConsoleExit},
    model::config::Cli,
    startup::ShutdownSignal,
};
use tokio::io::BufReader;

const VIP: &str = "00000000-0000-0000-0000-000000000001";
const REGULAR: &str = "00000000-0000-0000-0000-0000000000aa";

fn write_application(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let data_file = dir.path().join("data").join("cooldowns.json");
    let path = dir.path().join("application.yml");
    std::fs::write(
        &path,
        format!(
            r#"
cooldown:
  persistent-cooldowns: true
  data-file: {}
  cooldowns:
    home: 1h
    tp*: 10
  cooldown-groups:
    vip:
      multiplier: 0.5
permissions:
  {}:
    - hourglass.group.vip
"#,
            data_file.display(),
            VIP
        ),
    )
    .unwrap();
    path
}

fn load(path: &std::path::Path) -> Configuration {
    let cli = Cli::try_parse_from(["hourglass", "--config", path.to_str().unwrap()]).unwrap();
    Configuration::from_args(cli).unwrap()
}

fn build_gate(configuration: &Configuration) -> Arc<CooldownGate> {
    let (gate, report) = CooldownGate::from_config(&configuration.cooldown_config().unwrap()).unwrap();
    assert!(report.is_clean());
    Arc::new(gate.with_permissions(Arc::new(configuration.permissions())))
}

// =============================================================================
// Console session
// =============================================================================

#[tokio::test]
async fn test_console_session_applies_group_multiplier() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = load(&write_application(&dir));
    let gate = build_gate(&configuration);
    let console = Console::new(gate, configuration);

    let script = format!(
        "run {vip} /tpa bob\nrun {regular} /tpa bob\nrun {regular} /tpa bob\n",
        vip = VIP,
        regular = REGULAR
    );
    let mut out: Vec<u8> = Vec::new();
    let exit = console
        .run(BufReader::new(script.as_bytes()), &mut out, ShutdownSignal::new())
        .await
        .unwrap();

    assert_eq!(exit, ConsoleExit::InputClosed);
    let lines: Vec<String> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines[0], "allowed, cooldown 5s");
    assert_eq!(lines[1], "allowed, cooldown 10s");
    assert!(lines[2].starts_with("You must wait"));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_cooldowns_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_application(&dir);

    {
        let gate = build_gate(&load(&path));
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(CooldownPlugin::new(gate.clone())));
        registry.init_all().await.unwrap();

        let mut console = Console::new(gate, load(&path));
        console
            .execute(&format!("run {} /home", REGULAR), hourglass_common::now_millis())
            .await;
        registry.shutdown_all().await.unwrap();
    }

    let gate = build_gate(&load(&path));
    let mut registry = PluginRegistry::new();
    registry.register(Box::new(CooldownPlugin::new(gate.clone())));
    registry.init_all().await.unwrap();

    let regular = uuid::Uuid::parse_str(REGULAR).unwrap();
    assert!(gate.remaining(&regular, "home", hourglass_common::now_millis()) > 3_500);
}
