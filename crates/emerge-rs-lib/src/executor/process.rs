//! Spawning jobs in their own process group and signalling that group.

use std::process::Stdio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
	Terminate,
	Kill,
	Stop,
	Continue,
}

#[cfg(unix)]
impl Signal {
	fn raw(&self) -> libc::c_int {
		match self {
			Signal::Terminate => libc::SIGTERM,
			Signal::Kill => libc::SIGKILL,
			Signal::Stop => libc::SIGSTOP,
			Signal::Continue => libc::SIGCONT,
		}
	}
}

/// Builds the command with piped output, the child becomes leader of a new session and process group.
pub fn command<I, S>(program: &str, args: I) -> tokio::process::Command
where
	I: IntoIterator<Item = S>,
	S: AsRef<std::ffi::OsStr>,
{
	let mut cmd = tokio::process::Command::new(program);
	cmd.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped());

	#[cfg(unix)]
	unsafe {
		/* Only async-signal-safe calls between fork and exec */
		cmd.pre_exec(|| {
			if libc::setsid() == -1 {
				return Err(std::io::Error::last_os_error());
			}
			Ok(())
		});
	}
	cmd
}

/// Sends `signal` to every process in the group `pgid`.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: Signal) -> std::io::Result<()> {
	let pgid = libc::pid_t::try_from(pgid)
		.map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "process group id out of range"))?;
	if unsafe { libc::killpg(pgid, signal.raw()) } == -1 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(())
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: Signal) -> std::io::Result<()> {
	Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "process groups are only supported on unix"))
}

/// Whether any process of the group `pgid` still exists.
#[cfg(unix)]
pub fn group_alive(pgid: u32) -> bool {
	match libc::pid_t::try_from(pgid) {
		Ok(pgid) => unsafe { libc::killpg(pgid, 0) == 0 },
		Err(_) => false,
	}
}

#[cfg(not(unix))]
pub fn group_alive(_pgid: u32) -> bool {
	false
}

/// Exit code of a finished process, `128 + signal` when it was killed by a signal.
pub fn exit_code(status: &std::process::ExitStatus) -> i32 {
	if let Some(code) = status.code() {
		return code;
	}
	#[cfg(unix)]
	{
		use std::os::unix::process::ExitStatusExt;
		if let Some(signal) = status.signal() {
			return 128 + signal;
		}
	}
	-1
}
