/*!
Disassembler (mod API `disasm` only).

Decodes a single instruction starting at a given address. On x86/x64 this
delegates to `iced-x86`'s single-instruction decoder. On ARM64 there's no
variable-length encoding to decode: every instruction is exactly 4 bytes,
so the only thing worth reporting is that fixed length plus a generic
mnemonic, per spec.md's "fixed 4 bytes" note for that architecture.
!*/

use crate::error::{WhResult, WindhawkError};

/// Result of decoding one instruction: how many bytes it occupied and
/// its formatted mnemonic text (e.g. `"mov rax, rcx"`).
pub struct DisasmResult {
	pub length: usize,
	pub mnemonic: String,
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn decode_one(addr: usize, bytes: &[u8]) -> WhResult<DisasmResult> {
	use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

	if bytes.is_empty() {
		return Err(WindhawkError::InvalidState("no bytes to disassemble"));
	}

	let bitness: u32 = if cfg!(target_arch = "x86_64") { 64 } else { 32 };
	let mut decoder = Decoder::with_ip(bitness, bytes, addr as u64, DecoderOptions::NONE);
	if !decoder.can_decode() {
		return Err(WindhawkError::InvalidState("instruction decode failed"));
	}
	let instruction = decoder.decode();
	if instruction.is_invalid() {
		return Err(WindhawkError::InvalidState("invalid instruction encoding"));
	}

	let mut mnemonic = String::new();
	let mut formatter = NasmFormatter::new();
	formatter.format(&instruction, &mut mnemonic);

	Ok(DisasmResult {
		length: instruction.len(),
		mnemonic,
	})
}

#[cfg(target_arch = "aarch64")]
pub fn decode_one(_addr: usize, bytes: &[u8]) -> WhResult<DisasmResult> {
	const ARM64_INSTRUCTION_LENGTH: usize = 4;
	if bytes.len() < ARM64_INSTRUCTION_LENGTH {
		return Err(WindhawkError::InvalidState("fewer than 4 bytes available"));
	}
	Ok(DisasmResult {
		length: ARM64_INSTRUCTION_LENGTH,
		mnemonic: "(aarch64)".to_string(),
	})
}

#[cfg(test)]
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod tests {
	use super::*;

	#[test]
	fn decodes_a_single_nop() {
		let result = decode_one(0x1000, &[0x90, 0xcc, 0xcc]).unwrap();
		assert_eq!(result.length, 1);
		assert!(result.mnemonic.contains("nop"));
	}

	#[test]
	fn rejects_empty_input() {
		assert!(decode_one(0x1000, &[]).is_err());
	}
}
