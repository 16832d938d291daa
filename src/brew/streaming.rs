//! 流式命令执行
//!
//! 每次调用启动一个 brew 进程，stdout / stderr 各由一个读取线程按行分类，
//! 通过 channel 交给异步调用方；进程退出码只在输出读完后才交付。

use super::error::SpawnFailure;
use super::parser::clean_terminal_output;
use super::types::OutputLine;
use super::ExternalOperation;
use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use tokio::sync::{mpsc, oneshot};

/// 一次进程运行的输出流：有限、有序、只能消费一次
#[derive(Debug)]
pub struct OutputStream {
    lines: mpsc::UnboundedReceiver<OutputLine>,
    exit: oneshot::Receiver<io::Result<ExitStatus>>,
}

impl OutputStream {
    /// 下一行输出；进程的两个输出流都关闭后返回 None
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// 丢弃剩余输出并等待进程退出
    pub async fn finish(mut self) -> io::Result<ExitStatus> {
        while self.lines.recv().await.is_some() {}
        match self.exit.await {
            Ok(status) => status,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "等待子进程的线程意外退出",
            )),
        }
    }
}

/// 启动外部进程并返回其输出流
pub fn spawn_streaming(operation: &ExternalOperation) -> Result<OutputStream, SpawnFailure> {
    let mut cmd = Command::new(operation.program());
    cmd.args(operation.args());
    for (key, value) in operation.env() {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                // 独立进程组：终端里的 Ctrl+C 不会打断正在修改状态的 brew
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().map_err(|source| SpawnFailure {
        program: operation.program().display().to_string(),
        source,
    })?;
    log::debug!(
        "已启动 {:?} 操作 `{}` (pid {})",
        operation.family(),
        operation.command_line(),
        child.id()
    );

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    std::thread::spawn(move || {
        let stdout_tx = line_tx.clone();
        let stdout_handle =
            std::thread::spawn(move || read_stream_lines(stdout, &stdout_tx, false));
        let stderr_handle = std::thread::spawn(move || read_stream_lines(stderr, &line_tx, true));

        let _ = stdout_handle.join();
        let _ = stderr_handle.join();

        // 两个流都读完后再回收进程，调用方看到退出码时输出必然已全部送达
        let _ = exit_tx.send(child.wait());
    });

    Ok(OutputStream {
        lines: line_rx,
        exit: exit_rx,
    })
}

/// 从流中读取行并发送到 channel
///
/// `\n` 和 `\r` 都视为行结束（curl 下载进度条用 `\r` 就地刷新），空行丢弃。
fn read_stream_lines(
    stream: Option<impl Read>,
    tx: &mpsc::UnboundedSender<OutputLine>,
    is_stderr: bool,
) {
    let Some(mut reader) = stream else {
        return;
    };
    let mut buffer = [0u8; 1024];
    let mut line_buffer: Vec<u8> = Vec::new();

    let emit = |raw: &[u8]| {
        let cleaned = clean_terminal_output(&String::from_utf8_lossy(raw));
        if cleaned.trim().is_empty() {
            return;
        }
        let line = if is_stderr {
            OutputLine::StandardError(cleaned)
        } else {
            OutputLine::StandardOutput(cleaned)
        };
        // 接收端已丢弃时继续读完管道，避免子进程因写阻塞而挂起
        let _ = tx.send(line);
    };

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("读取子进程输出失败: {}", e);
                break;
            }
        };
        for &byte in &buffer[..n] {
            match byte {
                b'\n' | b'\r' => {
                    emit(&line_buffer);
                    line_buffer.clear();
                }
                _ => line_buffer.push(byte),
            }
        }
    }
    if !line_buffer.is_empty() {
        emit(&line_buffer);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::brew::{Brew, OperationFamily};

    fn sh(script: &str) -> ExternalOperation {
        Brew::new("/bin/sh").operation(OperationFamily::Listing, ["-c", script])
    }

    async fn collect(mut stream: OutputStream) -> (Vec<OutputLine>, ExitStatus) {
        let mut lines = Vec::new();
        while let Some(line) = stream.next_line().await {
            lines.push(line);
        }
        let status = stream.finish().await.unwrap();
        (lines, status)
    }

    #[tokio::test]
    async fn classifies_stdout_and_stderr() {
        let stream = spawn_streaming(&sh("echo one; echo two >&2; echo three")).unwrap();
        let (lines, status) = collect(stream).await;
        assert!(status.success());

        let stdout: Vec<&str> = lines
            .iter()
            .filter(|l| !l.is_error())
            .map(OutputLine::text)
            .collect();
        assert_eq!(stdout, ["one", "three"]);
        assert_eq!(
            lines.iter().filter(|l| l.is_error()).collect::<Vec<_>>(),
            [&OutputLine::StandardError("two".to_string())]
        );
    }

    #[tokio::test]
    async fn carriage_returns_split_progress_lines() {
        let stream = spawn_streaming(&sh("printf '#   10%%\\r#####  50%%\\r\\n\\ndone'")).unwrap();
        let (lines, _) = collect(stream).await;
        let texts: Vec<&str> = lines.iter().map(OutputLine::text).collect();
        assert_eq!(texts, ["#   10%", "#####  50%", "done"]);
    }

    #[tokio::test]
    async fn exit_status_is_reported_not_interpreted() {
        let stream = spawn_streaming(&sh("echo partial; exit 3")).unwrap();
        let (lines, status) = collect(stream).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn empty_run_is_not_a_spawn_failure() {
        let stream = spawn_streaming(&sh("true")).unwrap();
        let (lines, status) = collect(stream).await;
        assert!(lines.is_empty());
        assert!(status.success());
    }

    #[test]
    fn missing_executable_is_a_spawn_failure() {
        let op = Brew::new("/nonexistent/lian-brew/brew").operation(OperationFamily::Listing, ["list"]);
        let err = spawn_streaming(&op).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
        assert!(err.program.ends_with("brew"));
    }

    #[tokio::test]
    async fn finish_drains_unread_output() {
        let stream = spawn_streaming(&sh("seq 1 5000")).unwrap();
        assert!(stream.finish().await.unwrap().success());
    }
}
