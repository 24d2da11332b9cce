//! Configuration loading and lab derivation.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use stend::config::ConfigError;
use stend::test_support::EnvGuard;
use stend::{LabConfig, ShellConfig};
use tempfile::TempDir;

const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3Nza lab@example";

/// Variables that would otherwise layer over the files under test.
const LAYERED_VARS: &[&str] = &[
    "STEND_ACCESS_TOKEN",
    "STEND_PROJECT_ID",
    "STEND_SSH_USER",
    "STEND_ZONE",
    "STEND_MACHINE_TYPE",
    "STEND_DISK_SIZE_GB",
    "STEND_SSH_PORT",
    "STEND_SCRIPTS",
    "STEND_CUSTOM_IMAGE_NAME",
    "STEND_CONFIG_PATH",
];

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
        path
    }

    fn key_path(&self) -> Utf8PathBuf {
        self.write("id_ed25519.pub", &format!("{PUBLIC_KEY}\n"))
    }
}

#[fixture]
fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));
    Workspace { _dir: dir, root }
}

fn load(path: &Utf8Path) -> LabConfig {
    LabConfig::load_from_path(path).unwrap_or_else(|err| panic!("load {path}: {err}"))
}

fn valid_config(key: &Utf8Path) -> LabConfig {
    LabConfig {
        access_token: String::from("ya29.token"),
        project_id: String::from("demo-project"),
        ssh_user: String::from("lab"),
        ssh_public_key_file: key.to_string(),
        ..LabConfig::with_defaults()
    }
}

#[rstest]
#[tokio::test]
async fn toml_file_overrides_defaults(workspace: Workspace) {
    let _env = EnvGuard::remove_vars(LAYERED_VARS).await;
    let key = workspace.key_path();
    let path = workspace.write(
        "stend.toml",
        &format!(
            r#"
access_token = "ya29.token"
project_id = "demo-project"
instance_name = "lab1"
ssh_user = "lab"
ssh_public_key_file = "{key}"
machine_type = "n2-standard-8"
disk_size_gb = 40
ssh_port = 2222
"#
        ),
    );

    let config = load(&path);

    assert_eq!(config.project_id, "demo-project");
    assert_eq!(config.machine_type, "n2-standard-8");
    assert_eq!(config.disk_size_gb, 40);
    assert_eq!(config.ssh_port, 2222);
    assert_eq!(config.zone, "us-central1-a");
    assert_eq!(config.custom_image_name, "lab-image");
    assert!(config.validate().is_ok());
}

#[rstest]
#[tokio::test]
async fn yaml_file_is_accepted(workspace: Workspace) {
    let _env = EnvGuard::remove_vars(LAYERED_VARS).await;
    let path = workspace.write(
        "lab.yaml",
        "access_token: ya29.token\nproject_id: demo-project\nssh_user: lab\nzone: europe-west1-b\nscripts: first.sh, second.sh\n",
    );

    let config = load(&path);

    assert_eq!(config.zone, "europe-west1-b");
    assert_eq!(config.scripts, "first.sh, second.sh");
    assert_eq!(config.machine_type, "c2-standard-4");
}

#[rstest]
fn unknown_keys_are_rejected(workspace: Workspace) {
    let path = workspace.write("stend.toml", "project_id = \"demo\"\nmachine = \"big\"\n");

    let err = LabConfig::load_from_path(&path).err();

    assert!(
        matches!(err, Some(ConfigError::Parse(ref message)) if message.contains("unknown setting `machine`")),
        "unexpected result: {err:?}"
    );
}

#[rstest]
fn malformed_toml_is_a_parse_error(workspace: Workspace) {
    let path = workspace.write("stend.toml", "project_id = \n");
    assert!(matches!(
        LabConfig::load_from_path(&path),
        Err(ConfigError::Parse(_))
    ));
}

#[rstest]
fn missing_file_is_reported_with_its_path(workspace: Workspace) {
    let path = workspace.root.join("absent.toml");

    let err = LabConfig::load_from_path(&path).err();

    assert!(
        matches!(err, Some(ConfigError::FileRead { path: ref reported, .. }) if *reported == path.as_str()),
        "unexpected result: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn access_token_falls_back_to_environment(workspace: Workspace) {
    let path = workspace.write("stend.toml", "project_id = \"demo-project\"\n");
    let _guard = EnvGuard::set_vars(&[("STEND_ACCESS_TOKEN", "from-env")]).await;

    let config = load(&path);

    assert_eq!(config.access_token, "from-env");
    assert_eq!(config.project_id, "demo-project");
}

#[rstest]
#[tokio::test]
async fn environment_overrides_explicit_file(workspace: Workspace) {
    let path = workspace.write(
        "stend.toml",
        "access_token = \"ya29.token\"\nproject_id = \"from-file\"\nzone = \"europe-west1-b\"\n",
    );
    let _guard = EnvGuard::set_vars(&[
        ("STEND_PROJECT_ID", "from-env"),
        ("STEND_SSH_USER", "operator"),
    ])
    .await;

    let config = load(&path);

    assert_eq!(config.project_id, "from-env");
    assert_eq!(config.ssh_user, "operator");
    assert_eq!(config.zone, "europe-west1-b");
    assert_eq!(config.access_token, "ya29.token");
}

#[rstest]
#[tokio::test]
async fn explicit_file_without_required_values_loads_then_fails_validation(
    workspace: Workspace,
) {
    let _env = EnvGuard::remove_vars(LAYERED_VARS).await;
    let path = workspace.write("stend.toml", "zone = \"europe-west1-b\"\n");

    let config = load(&path);

    assert_eq!(config.zone, "europe-west1-b");
    assert_eq!(config.disk_size_gb, LabConfig::with_defaults().disk_size_gb);
    assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
}

#[rstest]
#[case::project(|config: &mut LabConfig| config.project_id.clear(), "STEND_PROJECT_ID", "project_id")]
#[case::user(|config: &mut LabConfig| config.ssh_user.clear(), "STEND_SSH_USER", "ssh_user")]
#[case::token(|config: &mut LabConfig| config.access_token.clear(), "STEND_ACCESS_TOKEN", "access_token")]
fn missing_fields_name_env_var_and_key(
    workspace: Workspace,
    #[case] blank: fn(&mut LabConfig),
    #[case] env_var: &str,
    #[case] key: &str,
) {
    let mut config = valid_config(&workspace.key_path());
    blank(&mut config);

    let Err(ConfigError::MissingField(message)) = config.validate() else {
        panic!("expected a missing field error");
    };
    assert!(message.contains(env_var), "{message}");
    assert!(message.contains(key), "{message}");
    assert!(message.contains("stend.toml"), "{message}");
}

#[rstest]
fn empty_script_list_is_rejected(workspace: Workspace) {
    let config = LabConfig {
        scripts: String::from(" , "),
        ..valid_config(&workspace.key_path())
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
}

#[rstest]
fn lab_spec_reads_the_public_key(workspace: Workspace) {
    let config = valid_config(&workspace.key_path());

    let lab = config
        .lab_spec(Some("lab1"), true)
        .unwrap_or_else(|err| panic!("lab spec: {err}"));

    assert_eq!(lab.name, "lab1");
    assert_eq!(lab.ssh_public_key, PUBLIC_KEY);
    assert!(lab.create_custom_image);
    assert_eq!(
        lab.scripts.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["install.sh", "lab-initial-setup.sh"]
    );
    assert_eq!(lab.firewall_rule_names(), vec!["ingress-lab1", "egress-lab1"]);
}

#[rstest]
fn lab_name_falls_back_to_configuration(workspace: Workspace) {
    let config = LabConfig {
        instance_name: Some(String::from("configured")),
        ..valid_config(&workspace.key_path())
    };

    let from_config = config
        .lab_spec(None, false)
        .unwrap_or_else(|err| panic!("lab spec: {err}"));
    let from_flag = config
        .lab_spec(Some("flagged"), false)
        .unwrap_or_else(|err| panic!("lab spec: {err}"));

    assert_eq!(from_config.name, "configured");
    assert_eq!(from_flag.name, "flagged");
}

#[rstest]
fn lab_name_is_required(workspace: Workspace) {
    let config = valid_config(&workspace.key_path());

    let Err(ConfigError::MissingField(message)) = config.lab_spec(None, false) else {
        panic!("expected a missing lab name");
    };
    assert!(message.contains("STEND_INSTANCE_NAME"), "{message}");
}

#[rstest]
fn lab_name_must_be_provider_safe(workspace: Workspace) {
    let config = valid_config(&workspace.key_path());
    assert!(matches!(
        config.lab_spec(Some("Lab_1"), false),
        Err(ConfigError::InvalidValue(_))
    ));
}

#[rstest]
fn missing_public_key_is_a_read_error(workspace: Workspace) {
    let config = valid_config(&workspace.root.join("missing.pub"));
    assert!(matches!(
        config.lab_spec(Some("lab1"), false),
        Err(ConfigError::FileRead { .. })
    ));
}

#[rstest]
fn shell_settings_follow_configuration(workspace: Workspace) {
    let config = LabConfig {
        ssh_identity_file: Some(String::from("/keys/lab")),
        ssh_port: 2222,
        connect_attempts: 5,
        connect_backoff_secs: 2,
        ..valid_config(&workspace.key_path())
    };

    let shell = config.shell_config();

    assert_eq!(
        shell,
        ShellConfig {
            ssh_port: 2222,
            identity_file: Some(String::from("/keys/lab")),
            connect_attempts: 5,
            connect_backoff: Duration::from_secs(2),
            ..ShellConfig::for_user("lab")
        }
    );
}

#[rstest]
fn compute_settings_carry_project_and_zone(workspace: Workspace) {
    let settings = valid_config(&workspace.key_path()).compute_settings();
    assert_eq!(settings.project_id, "demo-project");
    assert_eq!(settings.zone, "us-central1-a");
    assert_eq!(settings.api_base, "https://compute.googleapis.com/compute/v1");
}
