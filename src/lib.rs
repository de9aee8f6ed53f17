#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

macro_rules! with_context {
	(( $fmt:tt $($t:tt)* ), $e:expr) => {{
		use failure::Error;

		match (|| { $e })() {
			Ok(v) => Ok(v),
			Err(e) => {
				let e: Error = e;
				let msg = format!(concat!($fmt, ": {}") $($t)*, e);
				Err(Error::from(e.context(msg)))
			}
		}
	}};

	($msg:expr, $e:expr) => {
		with_context!(("{}", $msg), $e)
	};
}

pub type AResult<T> = Result<T, failure::Error>;

/// Parse a hex byte, `0x` prefix optional.
pub fn parse_hex_byte(s: &str) -> AResult<u8> {
	let digits = s.trim();
	let digits = if digits.starts_with("0x") || digits.starts_with("0X") { &digits[2..] } else { digits };
	with_context!(("invalid hex byte {:?}", s),
		Ok(u8::from_str_radix(digits, 16)?)
	)
}

pub mod firmware;
pub mod hal;
pub mod i2c;
pub mod loader;
pub mod lock;
pub mod sequencer;
pub mod bridge;
pub mod transport;
