//! Job control against a real pseudo-terminal.
//!
//! Each test starts the `jobsh` binary as the session leader of a fresh pty,
//! so terminal ownership and tty-generated signals behave as they do for a
//! user at a terminal.

#![cfg(unix)]

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::libc;
use nix::pty::openpty;
use nix::sys::termios;

const PROMPT: &str = "$ ";

struct PtySession {
    master: std::fs::File,
    child: std::process::Child,
}

impl PtySession {
    fn new() -> Self {
        let pty = openpty(None, None).expect("openpty failed");

        // No echo, so anything read back was written by a program. ISIG
        // keeps Ctrl-Z delivering SIGTSTP.
        let mut attrs = termios::tcgetattr(&pty.slave).expect("tcgetattr");
        attrs.local_flags.remove(termios::LocalFlags::ECHO);
        attrs.local_flags.insert(termios::LocalFlags::ISIG);
        termios::tcsetattr(&pty.slave, termios::SetArg::TCSANOW, &attrs).expect("tcsetattr");

        let slave_fd = pty.slave.as_raw_fd();
        // SAFETY: the dup'ed descriptors are handed to the child; the
        // pre_exec hook only calls async-signal-safe functions.
        let child = unsafe {
            use std::os::unix::process::CommandExt;
            let mut cmd = Command::new(env!("CARGO_BIN_EXE_jobsh"));
            cmd.stdin(Stdio::from_raw_fd(libc::dup(slave_fd)))
                .stdout(Stdio::from_raw_fd(libc::dup(slave_fd)))
                .stderr(Stdio::from_raw_fd(libc::dup(slave_fd)))
                .env_remove("RUST_LOG");
            cmd.pre_exec(|| {
                libc::setsid();
                libc::ioctl(0, libc::TIOCSCTTY as _, 0);
                Ok(())
            });
            cmd.spawn().expect("failed to spawn jobsh")
        };
        drop(pty.slave);

        let master_fd = pty.master.as_raw_fd();
        // SAFETY: F_GETFL/F_SETFL on a descriptor we own.
        unsafe {
            let flags = libc::fcntl(master_fd, libc::F_GETFL);
            libc::fcntl(master_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        // SAFETY: ownership moves from the OwnedFd into the File.
        let master = unsafe { std::fs::File::from_raw_fd(pty.master.into_raw_fd()) };

        let mut session = PtySession { master, child };
        session
            .wait_for(PROMPT, Duration::from_secs(5))
            .expect("never got initial prompt");
        session
    }

    fn send_line(&mut self, line: &str) {
        writeln!(self.master, "{line}").expect("write to pty failed");
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        self.master.write_all(bytes).expect("write to pty failed");
    }

    fn read_available(&mut self) -> String {
        let mut buf = [0u8; 4096];
        let mut output = String::new();
        loop {
            match self.master.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                // EIO once the slave side is gone
                Err(_) => break,
            }
        }
        output
    }

    fn wait_for(&mut self, expected: &str, timeout: Duration) -> Result<String, String> {
        let start = Instant::now();
        let mut accumulated = String::new();
        while start.elapsed() < timeout {
            accumulated.push_str(&self.read_available());
            if accumulated.contains(expected) {
                return Ok(accumulated);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Err(format!(
            "timeout waiting for {expected:?} in output:\n---\n{accumulated}\n---"
        ))
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = writeln!(self.master, "exit");
        std::thread::sleep(Duration::from_millis(100));
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn ctrl_z_stops_the_foreground_job() {
    let mut session = PtySession::new();
    session.send_line("sleep 30");
    std::thread::sleep(Duration::from_millis(300));
    session.send_bytes(&[0x1a]);

    session
        .wait_for("Stopped (SIGTSTP)", Duration::from_secs(5))
        .expect("stop notice after Ctrl-Z");
    session
        .wait_for(PROMPT, Duration::from_secs(5))
        .expect("prompt after Ctrl-Z");

    session.send_line("jobs");
    session
        .wait_for("[1] Stopped (SIGTSTP)  sleep 30", Duration::from_secs(5))
        .expect("job table lists the stopped job");
}

#[test]
fn fg_gives_a_resumed_reader_the_terminal() {
    let mut session = PtySession::new();
    session.send_line("cat");
    std::thread::sleep(Duration::from_millis(300));
    session.send_bytes(&[0x1a]);
    session
        .wait_for("Stopped (SIGTSTP)", Duration::from_secs(5))
        .expect("stop notice after Ctrl-Z");
    session
        .wait_for(PROMPT, Duration::from_secs(5))
        .expect("prompt after Ctrl-Z");

    session.send_line("fg");
    session
        .wait_for("cat", Duration::from_secs(5))
        .expect("fg names the job");
    std::thread::sleep(Duration::from_millis(300));

    // Read by the resumed cat and written back, not echoed by the tty.
    session.send_line("resumed input");
    let output = session
        .wait_for("resumed input", Duration::from_secs(5))
        .expect("cat echoes its input");
    assert!(!output.contains("Stopped"), "{output}");

    session.send_bytes(&[0x04]);
    let output = session
        .wait_for(PROMPT, Duration::from_secs(5))
        .expect("prompt after cat ends");
    assert!(!output.contains("Stopped"), "{output}");
}
