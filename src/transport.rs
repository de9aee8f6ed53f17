//! Serial link to the host.
//!
//! The firmware reads and writes single bytes; there is no framing. Reads
//! block until a byte arrives. The only way a read fails is the link going
//! away (EOF on the port), which can't happen on the real UART.

use std::collections::VecDeque;
use std::fs;
use std::io::{
	self,
	Read,
	Write,
};
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{
	AsRawFd,
	RawFd,
};
use std::path::Path;

pub trait SerialPort {
	/// blocks until a byte was received
	fn read_byte(&mut self) -> io::Result<u8>;

	/// blocks until the byte was handed to the transmitter
	fn write_byte(&mut self, byte: u8) -> io::Result<()>;

	/// whether `read_byte` would return without blocking
	fn byte_available(&mut self) -> io::Result<bool>;
}

impl<'a, P: ?Sized + SerialPort> SerialPort for &'a mut P {
	fn read_byte(&mut self) -> io::Result<u8> {
		P::read_byte(*self)
	}
	fn write_byte(&mut self, byte: u8) -> io::Result<()> {
		P::write_byte(*self, byte)
	}
	fn byte_available(&mut self) -> io::Result<bool> {
		P::byte_available(*self)
	}
}

fn link_closed() -> io::Error {
	io::Error::new(io::ErrorKind::UnexpectedEof, "serial link closed")
}

fn check(r: libc::c_int) -> io::Result<()> {
	if r < 0 {
		Err(io::Error::last_os_error())
	} else {
		Ok(())
	}
}

/// Switch a terminal to raw 8N1 without flow control; returns the previous
/// settings. Anything that isn't a terminal is left alone.
///
/// The link carries binary bytes: no echo, no line buffering, no CR/LF mapping.
fn make_raw(fd: RawFd) -> io::Result<Option<libc::termios>> {
	if 1 != unsafe { libc::isatty(fd) } {
		return Ok(None);
	}
	let mut tio: libc::termios = unsafe { mem::zeroed() };
	check(unsafe { libc::tcgetattr(fd, &mut tio) })?;
	let saved = tio;

	unsafe { libc::cfmakeraw(&mut tio) };
	tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
	tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
	tio.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
	// block until at least one byte arrived, no inter-byte timer
	tio.c_cc[libc::VMIN] = 1;
	tio.c_cc[libc::VTIME] = 0;
	check(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) })?;
	debug!("fd {}: switched terminal to raw 8N1", fd);
	Ok(Some(saved))
}

/// Serial link on file descriptors: a tty, a pty or stdin/stdout.
///
/// Reads are unbuffered, so `byte_available` can ask the kernel. Terminals
/// are put into raw mode while the port is open.
pub struct FdPort {
	input: fs::File,
	output: fs::File,
	restore: Vec<(RawFd, libc::termios)>,
}

impl FdPort {
	pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
		let input = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.custom_flags(libc::O_NOCTTY)
			.open(path)?;
		let output = input.try_clone()?;
		let mut port = FdPort { input, output, restore: Vec::new() };
		port.raw_mode(Direction::Input)?;
		Ok(port)
	}

	// linux only; the std handles buffer input, which would hide pending bytes from poll()
	pub fn stdio() -> io::Result<Self> {
		let input = fs::File::open("/dev/stdin")?;
		let output = fs::OpenOptions::new().write(true).open("/dev/stdout")?;
		let mut port = FdPort { input, output, restore: Vec::new() };
		port.raw_mode(Direction::Input)?;
		port.raw_mode(Direction::Output)?;
		Ok(port)
	}

	fn raw_mode(&mut self, direction: Direction) -> io::Result<()> {
		let fd = match direction {
			Direction::Input => self.input.as_raw_fd(),
			Direction::Output => self.output.as_raw_fd(),
		};
		if let Some(saved) = make_raw(fd)? {
			self.restore.push((fd, saved));
		}
		Ok(())
	}
}

#[derive(Clone, Copy)]
enum Direction {
	Input,
	Output,
}

impl Drop for FdPort {
	fn drop(&mut self) {
		for (fd, saved) in self.restore.drain(..).rev() {
			if let Err(e) = check(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &saved) }) {
				warn!("fd {}: couldn't restore terminal settings: {}", fd, e);
			}
		}
	}
}

/// The named serial device, or stdin/stdout without one.
pub fn open_link(path: Option<&str>) -> crate::AResult<FdPort> {
	match path {
		Some(path) => with_context!(("couldn't open serial port {:?}", path),
			Ok(FdPort::open(path)?)
		),
		None => with_context!("couldn't use stdin/stdout as serial link",
			Ok(FdPort::stdio()?)
		),
	}
}

impl SerialPort for FdPort {
	fn read_byte(&mut self) -> io::Result<u8> {
		let mut buf = [0u8];
		loop {
			match self.input.read(&mut buf) {
				Ok(0) => return Err(link_closed()),
				Ok(_) => return Ok(buf[0]),
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
				Err(e) => return Err(e),
			}
		}
	}

	fn write_byte(&mut self, byte: u8) -> io::Result<()> {
		self.output.write_all(&[byte])?;
		self.output.flush()
	}

	fn byte_available(&mut self) -> io::Result<bool> {
		let mut pfd = libc::pollfd {
			fd: self.input.as_raw_fd(),
			events: libc::POLLIN,
			revents: 0,
		};
		let r = unsafe { libc::poll(&mut pfd, 1, 0) };
		if r < 0 {
			let e = io::Error::last_os_error();
			if e.kind() == io::ErrorKind::Interrupted {
				return Ok(false);
			}
			return Err(e);
		}
		// a hangup is reported as "available" so the next read sees EOF
		Ok(r > 0 && 0 != pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR))
	}
}

/// In-memory link: the host's bytes are queued up front, responses collected.
///
/// Running out of queued input counts as the host hanging up.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ScriptedPort {
	input: VecDeque<u8>,
	output: Vec<u8>,
}

impl ScriptedPort {
	pub fn new(input: &[u8]) -> Self {
		ScriptedPort {
			input: input.iter().cloned().collect(),
			output: Vec::new(),
		}
	}

	/// number of queued bytes not read yet
	pub fn pending(&self) -> usize {
		self.input.len()
	}

	pub fn output(&self) -> &[u8] {
		&self.output
	}

	pub fn take_output(&mut self) -> Vec<u8> {
		std::mem::replace(&mut self.output, Vec::new())
	}
}

impl SerialPort for ScriptedPort {
	fn read_byte(&mut self) -> io::Result<u8> {
		self.input.pop_front().ok_or_else(link_closed)
	}

	fn write_byte(&mut self, byte: u8) -> io::Result<()> {
		self.output.push(byte);
		Ok(())
	}

	fn byte_available(&mut self) -> io::Result<bool> {
		if self.input.is_empty() {
			Err(link_closed())
		} else {
			Ok(true)
		}
	}
}

pub fn is_link_closed(e: &io::Error) -> bool {
	e.kind() == io::ErrorKind::UnexpectedEof
}
