use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const INSTANCE_CONFIG: &str = r#"
endpoint: http://127.0.0.1:9
region: ap-tokyo
resources:
  - type: clickhouse_instance
    name: main
    config:
      name: analytics
      zone: ap-tokyo-3
      vpc_id: vpc-1
      subnet_id: subnet-1
      data_spec:
        spec_name: S1
        count: 2
        disk_size: 300
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_config(&self, content: &str) -> PathBuf {
        let path = self.config_path();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("strato.yaml")
    }

    #[allow(dead_code)]
    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join(".stratoflow")
    }

    /// `strato` isolated from the caller's environment, run inside the project
    pub fn strato(&self) -> Command {
        let mut cmd = Command::cargo_bin("strato").unwrap();
        cmd.current_dir(self.root.path())
            .env("NO_COLOR", "1")
            .env("HOME", self.root.path())
            .env("XDG_CONFIG_HOME", self.root.path().join("xdg"))
            .env_remove("STRATOFLOW_CONFIG_PATH")
            .env_remove("STRATOFLOW_API_TOKEN")
            .env_remove("RUST_LOG");
        cmd
    }
}
