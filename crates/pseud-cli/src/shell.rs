use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use anyhow::{anyhow, Context, Result};
use pseud_driver::{DeviceError, Driver, Session};

use crate::commands::{parse_line, Command, HELP};

const MMAP_START_MARKER: &[u8] = b"hello, world!\0";
const MMAP_END_MARKER: &[u8] = b"goodbye, world!\0";

/// Executes console commands against one driver instance.
pub struct Shell {
    driver: Driver,
    sessions: BTreeMap<u32, Session>,
    next_handle: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Shell {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            sessions: BTreeMap::new(),
            next_handle: 0,
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Runs every line of `input`, writing results to `out`. A failing line is reported as
    /// `error: ...` and does not stop the script. Lock contention and interruption are marked
    /// as worth retrying.
    ///
    /// Returns the number of failed lines.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<usize> {
        let mut failures = 0;
        for (lineno, line) in input.lines().enumerate() {
            let line = line.context("failed to read command input")?;
            let result = parse_line(&line)
                .with_context(|| format!("line {}", lineno + 1))
                .and_then(|command| match command {
                    Some(command) => self.execute(command, out),
                    None => Ok(Flow::Continue),
                });
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(err) => {
                    failures += 1;
                    tracing::debug!(line = lineno + 1, "command failed: {err:#}");
                    let hint = if is_transient(&err) { " (try again)" } else { "" };
                    writeln!(out, "error: {err:#}{hint}")?;
                }
            }
        }
        out.flush()?;
        Ok(failures)
    }

    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> Result<Flow> {
        match command {
            Command::Create { id, name } => {
                let device = match name {
                    Some(name) => self.driver.create_named(id, &name)?,
                    None => self.driver.create(id)?,
                };
                writeln!(out, "created {}", device.node_name())?;
            }
            Command::CreateNext => {
                let device = self.driver.create_next()?;
                writeln!(out, "created {}", device.node_name())?;
            }
            Command::Remove { id } => {
                self.driver.remove(id)?;
                writeln!(out, "removed {id}")?;
            }
            Command::List => {
                for info in self.driver.devices() {
                    writeln!(out, "{}\t{}\t{}", info.id, info.node_name, info.capacity)?;
                }
            }
            Command::Open { id } => {
                let session = self.driver.open(id)?;
                let handle = self.next_handle;
                self.next_handle += 1;
                self.sessions.insert(handle, session);
                writeln!(out, "session {handle}")?;
            }
            Command::Close { handle } => {
                let mut session = self
                    .sessions
                    .remove(&handle)
                    .ok_or_else(|| anyhow!("no session {handle}"))?;
                session.close();
                writeln!(out, "closed {handle}")?;
            }
            Command::Read {
                handle,
                count,
                mode,
            } => {
                let session = self.session(handle)?;
                let mut buf = vec![0u8; count.min(session.capacity()?)];
                let n = session.read(&mut buf, mode)?;
                writeln!(out, "read {n}: {}", buf[..n].escape_ascii())?;
            }
            Command::Write { handle, data, mode } => {
                let session = self.session(handle)?;
                let n = session.write(&data, mode)?;
                writeln!(out, "wrote {n}")?;
            }
            Command::Seek {
                handle,
                delta,
                whence,
            } => {
                let pos = self.session(handle)?.seek(delta, whence)?;
                writeln!(out, "pos {pos}")?;
            }
            Command::Hexdump { id, offset, len } => {
                let snapshot = self.driver.lookup(id)?.snapshot();
                let end = offset.saturating_add(len).min(snapshot.len());
                let start = offset.min(end);
                hexdump(out, start, &snapshot[start..end])?;
            }
            Command::AttrShow { id, attr } => {
                let text = self.driver.attr_show(id, attr)?;
                write!(out, "{attr} = {text}")?;
            }
            Command::AttrStore { id, attr, text } => {
                self.driver.attr_store(id, attr, &text)?;
                writeln!(out, "{attr} <- {text}")?;
            }
            Command::MmapTest { id } => self.mmap_test(id, out)?,
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn session(&mut self, handle: u32) -> Result<&mut Session> {
        self.sessions
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("no session {handle}"))
    }

    /// Maps the whole device and writes one marker at the start and one ending at the last byte.
    fn mmap_test<W: Write>(&self, id: u32, out: &mut W) -> Result<()> {
        let session = self.driver.open(id)?;
        let capacity = self.driver.lookup(id)?.capacity();
        let map = session
            .mmap(capacity, 0)
            .with_context(|| format!("failed to map device {id}"))?;

        let end = capacity
            .checked_sub(MMAP_END_MARKER.len())
            .context("device too small for the mmap test")?;
        map.write_from(0, MMAP_START_MARKER)?;
        map.write_from(end, MMAP_END_MARKER)?;

        for offset in [0, end] {
            let text = map.read_cstr(offset)?;
            writeln!(out, "{}", String::from_utf8_lossy(&text))?;
        }
        Ok(())
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DeviceError>()
        .is_some_and(DeviceError::is_transient)
}

fn hexdump<W: Write>(out: &mut W, base: usize, bytes: &[u8]) -> Result<()> {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(out, "{:08x}  {:<47}  |{ascii}|", base + i * 16, hex.join(" "))?;
    }
    Ok(())
}
