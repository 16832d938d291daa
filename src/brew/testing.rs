//! 测试用的假 brew：一个按子命令分支的 shell 脚本

use super::Brew;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

pub(crate) struct FakeBrew {
    dir: TempDir,
    pub brew: Brew,
}

impl FakeBrew {
    /// `case_arms` 是匹配 `"$*"` 的 case 分支，`$FAKE_DIR` 指向临时目录
    pub fn new(case_arms: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "#!/bin/sh\n\
             FAKE_DIR='{dir}'\n\
             echo \"$*\" >> \"$FAKE_DIR/invocations.log\"\n\
             case \"$*\" in\n\
             {case_arms}\n\
             *) echo \"Error: Unknown command: $1\" >&2; exit 1 ;;\n\
             esac\n",
            dir = dir.path().display(),
        );
        let path = dir.path().join("brew");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Self {
            brew: Brew::new(path),
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// 写入脚本运行时读取的状态文件
    pub fn write(&self, name: &str, contents: &str) {
        fs::write(self.path(name), contents).unwrap();
    }

    /// 按调用顺序记录的参数行
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.path("invocations.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

pub(crate) const SERVICES_JSON: &str = r#"[
  {"name": "postgresql@16", "status": "started", "user": "me", "file": "/tmp/homebrew.mxcl.postgresql@16.plist", "exit_code": 0},
  {"name": "redis", "status": "none", "user": null, "file": null, "exit_code": null}
]"#;

pub(crate) const PACKAGES_JSON: &str = r#"{
  "formulae": [
    {"name": "foo", "desc": "Outdated formula", "installed": [{"version": "1.0", "installed_on_request": true}], "outdated": true},
    {"name": "libbar", "desc": "Dependency", "installed": [{"version": "2.1", "installed_on_request": false}], "outdated": false},
    {"name": "wget", "desc": "Internet file retriever", "installed": [{"version": "1.24.5", "installed_on_request": true}], "outdated": false}
  ],
  "casks": [
    {"token": "firefox", "desc": "Web browser", "installed": "128.0", "outdated": true}
  ]
}"#;
