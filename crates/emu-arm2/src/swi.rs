//! SWI dispatcher: the OS-call surface of the emulated machine.
//!
//! Parameters arrive in registers, results return in R0. Console I/O goes
//! through the `HostIo` seam so the same dispatcher serves a real terminal
//! (CLI runs) and the session's buffered pipe (frontends). Blocking reads
//! never block here: when input is not ready the dispatcher reports
//! `WaitInput` without consuming anything, and the caller retries the same
//! SWI once input arrives.

use crate::error::RuntimeErrorKind;
use crate::memory::{Memory, DATA_START, DATA_SIZE};
use cpu_arm2::{Bus, Registers};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

// Console
pub const SWI_EXIT: u32 = 0x00;
pub const SWI_WRITE_CHAR: u32 = 0x01;
pub const SWI_WRITE_STRING: u32 = 0x02;
pub const SWI_WRITE_INT: u32 = 0x03;
pub const SWI_READ_CHAR: u32 = 0x04;
pub const SWI_READ_STRING: u32 = 0x05;
pub const SWI_READ_INT: u32 = 0x06;
pub const SWI_WRITE_HEX: u32 = 0x07;
pub const SWI_WRITE_NEWLINE: u32 = 0x08;
// File I/O
pub const SWI_OPEN: u32 = 0x10;
pub const SWI_CLOSE: u32 = 0x11;
pub const SWI_READ_BYTES: u32 = 0x12;
pub const SWI_WRITE_BYTES: u32 = 0x13;
pub const SWI_SEEK: u32 = 0x14;
pub const SWI_TELL: u32 = 0x15;
pub const SWI_FILE_SIZE: u32 = 0x16;
pub const SWI_DELETE: u32 = 0x17;
// Memory / time
pub const SWI_HEAP_ALLOC: u32 = 0x20;
pub const SWI_HEAP_FREE: u32 = 0x21;
pub const SWI_TIME_UNIX: u32 = 0x22;
pub const SWI_TIME_MILLIS: u32 = 0x23;
pub const SWI_SLEEP_MS: u32 = 0x24;
pub const SWI_CYCLES: u32 = 0x25;
pub const SWI_MEM_TOTAL: u32 = 0x26;
pub const SWI_MEM_FREE: u32 = 0x27;
// Debug helpers
pub const SWI_BREAKPOINT_TRAP: u32 = 0xF0;
pub const SWI_PRINT_REGS: u32 = 0xF1;
pub const SWI_PRINT_FLAGS: u32 = 0xF2;
pub const SWI_PRINT_MEM: u32 = 0xF3;

/// Error sentinel returned in R0 by failed file operations.
pub const SWI_ERROR: u32 = 0xFFFF_FFFF;

/// Result of a console read attempt.
pub enum IoWait<T> {
    Ready(T),
    /// No input buffered yet; retry after `send_input`.
    WouldBlock,
}

/// Host-side console I/O.
///
/// Writes always succeed; reads may report `WouldBlock` on a buffered
/// pipe. A real-terminal implementation simply blocks and never returns
/// `WouldBlock`.
pub trait HostIo: Send {
    fn write_stdout(&mut self, bytes: &[u8]);
    fn read_char(&mut self) -> IoWait<u8>;
    /// Read one line, newline stripped.
    fn read_line(&mut self) -> IoWait<String>;
}

/// `HostIo` over the process's real stdin/stdout (CLI runs).
pub struct StdIo;

impl HostIo for StdIo {
    fn write_stdout(&mut self, bytes: &[u8]) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = lock.write_all(bytes);
        let _ = lock.flush();
    }

    fn read_char(&mut self) -> IoWait<u8> {
        let mut byte = [0u8; 1];
        match std::io::stdin().read(&mut byte) {
            Ok(1) => IoWait::Ready(byte[0]),
            // EOF reads as NUL
            _ => IoWait::Ready(0),
        }
    }

    fn read_line(&mut self) -> IoWait<String> {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        IoWait::Ready(line)
    }
}

/// What a dispatched SWI asks the machine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwiOutcome {
    /// Completed; advance past the SWI.
    Continue,
    /// EXIT: halt with the code from R0.
    Exit(u32),
    /// Input not ready; keep PC on the SWI and retry later.
    WaitInput,
    /// BREAKPOINT_TRAP: advance past the SWI, then suspend.
    BreakpointTrap,
}

/// SWI dispatcher state: open file handles and the heap bump pointer.
pub struct SwiHost {
    files: HashMap<u32, File>,
    next_handle: u32,
    heap_next: u32,
    heap_end: u32,
}

impl Default for SwiHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SwiHost {
    #[must_use]
    pub fn new() -> Self {
        // The heap occupies the upper half of the data segment.
        let heap_start = DATA_START + DATA_SIZE / 2;
        Self {
            files: HashMap::new(),
            next_handle: 1,
            heap_next: heap_start,
            heap_end: DATA_START + DATA_SIZE,
        }
    }

    /// Drop all handles and reset the heap.
    pub fn reset(&mut self) {
        self.files.clear();
        self.next_handle = 1;
        let heap_start = DATA_START + DATA_SIZE / 2;
        self.heap_next = heap_start;
    }

    /// Bytes left in the heap.
    #[must_use]
    pub fn heap_free(&self) -> u32 {
        self.heap_end.saturating_sub(self.heap_next)
    }

    /// Dispatch one SWI. On `Ok(Continue)` R0 holds the result where the
    /// call defines one.
    pub fn dispatch(
        &mut self,
        number: u32,
        regs: &mut Registers,
        memory: &mut Memory,
        io: &mut dyn HostIo,
        cycles: u64,
    ) -> Result<SwiOutcome, RuntimeErrorKind> {
        match number {
            SWI_EXIT => Ok(SwiOutcome::Exit(regs.r[0])),
            SWI_WRITE_CHAR => {
                io.write_stdout(&[regs.r[0] as u8]);
                Ok(SwiOutcome::Continue)
            }
            SWI_WRITE_STRING => {
                let bytes = self.read_c_string(memory, regs.r[0])?;
                io.write_stdout(&bytes);
                Ok(SwiOutcome::Continue)
            }
            SWI_WRITE_INT => {
                io.write_stdout(format!("{}", regs.r[0] as i32).as_bytes());
                Ok(SwiOutcome::Continue)
            }
            SWI_WRITE_HEX => {
                io.write_stdout(format!("{:08X}", regs.r[0]).as_bytes());
                Ok(SwiOutcome::Continue)
            }
            SWI_WRITE_NEWLINE => {
                io.write_stdout(b"\n");
                Ok(SwiOutcome::Continue)
            }
            SWI_READ_CHAR => match io.read_char() {
                IoWait::Ready(b) => {
                    regs.r[0] = u32::from(b);
                    Ok(SwiOutcome::Continue)
                }
                IoWait::WouldBlock => Ok(SwiOutcome::WaitInput),
            },
            SWI_READ_STRING => {
                let buf = regs.r[0];
                let max = regs.r[1];
                match io.read_line() {
                    IoWait::Ready(line) => {
                        let stored = self.store_line(memory, buf, max, line.as_bytes())?;
                        regs.r[0] = stored;
                        Ok(SwiOutcome::Continue)
                    }
                    IoWait::WouldBlock => Ok(SwiOutcome::WaitInput),
                }
            }
            SWI_READ_INT => match io.read_line() {
                IoWait::Ready(line) => {
                    regs.r[0] = line.trim().parse::<i64>().unwrap_or(0) as u32;
                    Ok(SwiOutcome::Continue)
                }
                IoWait::WouldBlock => Ok(SwiOutcome::WaitInput),
            },

            SWI_OPEN => {
                let path = String::from_utf8_lossy(&self.read_c_string(memory, regs.r[0])?)
                    .into_owned();
                let mode = regs.r[1];
                let result = match mode {
                    0 => OpenOptions::new().read(true).open(&path),
                    1 => OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&path),
                    2 => OpenOptions::new().append(true).create(true).open(&path),
                    _ => {
                        regs.r[0] = SWI_ERROR;
                        return Ok(SwiOutcome::Continue);
                    }
                };
                regs.r[0] = match result {
                    Ok(file) => {
                        let handle = self.next_handle;
                        self.next_handle += 1;
                        self.files.insert(handle, file);
                        handle
                    }
                    Err(_) => SWI_ERROR,
                };
                Ok(SwiOutcome::Continue)
            }
            SWI_CLOSE => {
                regs.r[0] = if self.files.remove(&regs.r[0]).is_some() {
                    0
                } else {
                    SWI_ERROR
                };
                Ok(SwiOutcome::Continue)
            }
            SWI_READ_BYTES => {
                let (handle, buf, len) = (regs.r[0], regs.r[1], regs.r[2]);
                let Some(file) = self.files.get_mut(&handle) else {
                    regs.r[0] = SWI_ERROR;
                    return Ok(SwiOutcome::Continue);
                };
                let mut data = vec![0u8; len as usize];
                match file.read(&mut data) {
                    Ok(n) => {
                        for (i, &b) in data[..n].iter().enumerate() {
                            memory
                                .write_byte(buf + i as u32, b)
                                .map_err(fault_to_runtime)?;
                        }
                        regs.r[0] = n as u32;
                    }
                    Err(_) => regs.r[0] = SWI_ERROR,
                }
                Ok(SwiOutcome::Continue)
            }
            SWI_WRITE_BYTES => {
                let (handle, buf, len) = (regs.r[0], regs.r[1], regs.r[2]);
                let mut data = Vec::with_capacity(len as usize);
                for i in 0..len {
                    data.push(memory.read_byte(buf + i).map_err(fault_to_runtime)?);
                }
                let Some(file) = self.files.get_mut(&handle) else {
                    regs.r[0] = SWI_ERROR;
                    return Ok(SwiOutcome::Continue);
                };
                regs.r[0] = match file.write(&data) {
                    Ok(n) => n as u32,
                    Err(_) => SWI_ERROR,
                };
                Ok(SwiOutcome::Continue)
            }
            SWI_SEEK => {
                let (handle, offset, whence) = (regs.r[0], regs.r[1], regs.r[2]);
                let Some(file) = self.files.get_mut(&handle) else {
                    regs.r[0] = SWI_ERROR;
                    return Ok(SwiOutcome::Continue);
                };
                let pos = match whence {
                    0 => SeekFrom::Start(u64::from(offset)),
                    1 => SeekFrom::Current(i64::from(offset as i32)),
                    2 => SeekFrom::End(i64::from(offset as i32)),
                    _ => {
                        regs.r[0] = SWI_ERROR;
                        return Ok(SwiOutcome::Continue);
                    }
                };
                regs.r[0] = match file.seek(pos) {
                    Ok(p) => p as u32,
                    Err(_) => SWI_ERROR,
                };
                Ok(SwiOutcome::Continue)
            }
            SWI_TELL => {
                let Some(file) = self.files.get_mut(&regs.r[0]) else {
                    regs.r[0] = SWI_ERROR;
                    return Ok(SwiOutcome::Continue);
                };
                regs.r[0] = match file.stream_position() {
                    Ok(p) => p as u32,
                    Err(_) => SWI_ERROR,
                };
                Ok(SwiOutcome::Continue)
            }
            SWI_FILE_SIZE => {
                let Some(file) = self.files.get_mut(&regs.r[0]) else {
                    regs.r[0] = SWI_ERROR;
                    return Ok(SwiOutcome::Continue);
                };
                regs.r[0] = match file.metadata() {
                    Ok(m) => m.len() as u32,
                    Err(_) => SWI_ERROR,
                };
                Ok(SwiOutcome::Continue)
            }
            SWI_DELETE => {
                let path = String::from_utf8_lossy(&self.read_c_string(memory, regs.r[0])?)
                    .into_owned();
                regs.r[0] = match std::fs::remove_file(&path) {
                    Ok(()) => 0,
                    Err(_) => SWI_ERROR,
                };
                Ok(SwiOutcome::Continue)
            }

            SWI_HEAP_ALLOC => {
                let size = regs.r[0];
                let aligned = self.heap_next.next_multiple_of(8);
                if size == 0 || aligned.saturating_add(size) > self.heap_end {
                    regs.r[0] = 0;
                } else {
                    self.heap_next = aligned + size;
                    regs.r[0] = aligned;
                }
                Ok(SwiOutcome::Continue)
            }
            SWI_HEAP_FREE => Ok(SwiOutcome::Continue),
            SWI_TIME_UNIX => {
                regs.r[0] = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs() as u32);
                Ok(SwiOutcome::Continue)
            }
            SWI_TIME_MILLIS => {
                regs.r[0] = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_millis() as u32);
                Ok(SwiOutcome::Continue)
            }
            SWI_SLEEP_MS => {
                std::thread::sleep(std::time::Duration::from_millis(u64::from(regs.r[0])));
                Ok(SwiOutcome::Continue)
            }
            SWI_CYCLES => {
                regs.r[0] = cycles as u32;
                Ok(SwiOutcome::Continue)
            }
            SWI_MEM_TOTAL => {
                regs.r[0] = DATA_SIZE;
                Ok(SwiOutcome::Continue)
            }
            SWI_MEM_FREE => {
                regs.r[0] = self.heap_free();
                Ok(SwiOutcome::Continue)
            }

            SWI_BREAKPOINT_TRAP => Ok(SwiOutcome::BreakpointTrap),
            SWI_PRINT_REGS => {
                let mut out = String::new();
                for n in 0..16 {
                    out.push_str(&format!(
                        "{:<3} = {:#010X}{}",
                        Registers::name(n),
                        regs.r[n],
                        if n % 4 == 3 { "\n" } else { "  " }
                    ));
                }
                io.write_stdout(out.as_bytes());
                Ok(SwiOutcome::Continue)
            }
            SWI_PRINT_FLAGS => {
                io.write_stdout(format!("flags: {}\n", regs.cpsr.display()).as_bytes());
                Ok(SwiOutcome::Continue)
            }
            SWI_PRINT_MEM => {
                let (addr, len) = (regs.r[0], regs.r[1].min(256));
                let bytes = memory.read_lossy(addr, len as usize);
                let mut out = String::new();
                for (i, chunk) in bytes.chunks(16).enumerate() {
                    out.push_str(&format!("{:08X}: ", addr + 16 * i as u32));
                    for b in chunk {
                        out.push_str(&format!("{b:02X} "));
                    }
                    out.push('\n');
                }
                io.write_stdout(out.as_bytes());
                Ok(SwiOutcome::Continue)
            }

            other => Err(RuntimeErrorKind::InvalidSwi { number: other }),
        }
    }

    /// Read a NUL-terminated string from guest memory (capped at 64 KiB).
    fn read_c_string(
        &self,
        memory: &mut Memory,
        mut addr: u32,
    ) -> Result<Vec<u8>, RuntimeErrorKind> {
        let mut bytes = Vec::new();
        loop {
            let b = memory.read_byte(addr).map_err(fault_to_runtime)?;
            if b == 0 || bytes.len() >= 0x1_0000 {
                return Ok(bytes);
            }
            bytes.push(b);
            addr = addr.wrapping_add(1);
        }
    }

    /// Store a line into a guest buffer, NUL-terminated, returning the
    /// stored length.
    fn store_line(
        &self,
        memory: &mut Memory,
        buf: u32,
        max: u32,
        line: &[u8],
    ) -> Result<u32, RuntimeErrorKind> {
        if max == 0 {
            return Ok(0);
        }
        let take = line.len().min(max as usize - 1);
        for (i, &b) in line[..take].iter().enumerate() {
            memory
                .write_byte(buf + i as u32, b)
                .map_err(fault_to_runtime)?;
        }
        memory
            .write_byte(buf + take as u32, 0)
            .map_err(fault_to_runtime)?;
        Ok(take as u32)
    }
}

/// Map a memory fault inside a SWI to its runtime error.
fn fault_to_runtime(fault: cpu_arm2::MemFault) -> RuntimeErrorKind {
    RuntimeErrorKind::from_fault(fault, None)
}
