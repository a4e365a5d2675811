#![allow(dead_code)]

use std::{
    fs,
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use texpress::config::CompileSettings;

pub const DOCUMENT: &str = "\\documentclass{article}
\\begin{document}
See Section~\\ref{sec:intro} for the value $x_1$.
\\section{Introduction}\\label{sec:intro}
Done.
\\end{document}
";

/// Write an executable shell script standing in for the typesetting engine.
#[cfg(unix)]
pub fn fake_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write fake engine");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

pub fn settings(engine: &Path, workspace_root: &Path, max_passes: u32) -> CompileSettings {
    CompileSettings {
        engine_path: engine.to_path_buf(),
        max_passes: NonZeroU32::new(max_passes).expect("non-zero passes"),
        pass_timeout: Duration::from_secs(10),
        max_concurrency: NonZeroUsize::new(4).expect("non-zero concurrency"),
        workspace_root: workspace_root.to_path_buf(),
        ..CompileSettings::default()
    }
}

/// Number of entries left under the workspace root.
pub fn leftover_workspaces(root: &Path) -> usize {
    match fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

/// How many times a fake engine appended to its invocation log.
pub fn invocations(log: &Path) -> usize {
    fs::read_to_string(log)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

/// Fake engine that records its pid and then hangs well past any test timeout.
#[cfg(unix)]
pub fn hanging_engine(dir: &Path) -> (PathBuf, PathBuf) {
    let pid_file = dir.join("engine.pid");
    let engine = fake_engine(
        dir,
        "fake-pdflatex",
        &format!(
            "echo \"This is pdfTeX partial log\"\necho $$ > \"{}\"\nexec sleep 30\n",
            pid_file.display()
        ),
    );
    (engine, pid_file)
}

pub fn read_pid(pid_file: &Path) -> u32 {
    fs::read_to_string(pid_file)
        .expect("engine should have written its pid")
        .trim()
        .parse()
        .expect("pid should be numeric")
}

/// Poll `/proc` until `pid` is gone or a zombie, giving up after `within`.
#[cfg(target_os = "linux")]
pub fn process_exited(pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        let exited = match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                == Some('Z'),
        };
        if exited {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
