use anyhow::{anyhow, bail, Context, Result};
use pseud_driver::{Acquire, Attribute, Whence};

pub const HELP: &str = "\
commands:
  create <id> [name]                 create a device
  create-next                        create a device under the lowest free id
  remove <id>                        remove a device
  list                               list live devices
  open <id>                          open a session, prints its handle
  close <handle>                     close a session
  read <handle> <count> [nonblock]   read through a session
  write <handle> [nonblock] <text>   write the rest of the line through a session
  seek <handle> <delta> <set|cur|end>
  hexdump <id> [offset] [len]        dump device memory
  attr <id> <address|value> [text]   show or store an attribute
  mmap-test <id>                     map a device and write markers at both ends
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { id: u32, name: Option<String> },
    CreateNext,
    Remove { id: u32 },
    List,
    Open { id: u32 },
    Close { handle: u32 },
    Read { handle: u32, count: usize, mode: Acquire },
    Write { handle: u32, data: Vec<u8>, mode: Acquire },
    Seek { handle: u32, delta: i64, whence: Whence },
    Hexdump { id: u32, offset: usize, len: usize },
    AttrShow { id: u32, attr: Attribute },
    AttrStore { id: u32, attr: Attribute, text: String },
    MmapTest { id: u32 },
    Help,
    Quit,
}

const DEFAULT_HEXDUMP_LEN: usize = 64;

/// Parses one script line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (verb, rest) = split_word(line);
    let mut args = rest.split_whitespace();

    let command = match verb {
        "create" => Command::Create {
            id: number(args.next(), "id")?,
            name: args.next().map(str::to_string),
        },
        "create-next" => Command::CreateNext,
        "remove" => Command::Remove {
            id: number(args.next(), "id")?,
        },
        "list" | "ls" => Command::List,
        "open" => Command::Open {
            id: number(args.next(), "id")?,
        },
        "close" => Command::Close {
            handle: number(args.next(), "handle")?,
        },
        "read" => Command::Read {
            handle: number(args.next(), "handle")?,
            count: number(args.next(), "count")?,
            mode: mode(args.next())?,
        },
        "write" => {
            let (handle, rest) = split_word(rest);
            let handle = number(Some(handle), "handle")?;
            let (mode, text) = match split_word(rest) {
                ("nonblock", text) => (Acquire::NonBlocking, text),
                _ => (Acquire::Blocking, rest),
            };
            Command::Write {
                handle,
                data: text.trim_start().as_bytes().to_vec(),
                mode,
            }
        }
        "seek" => Command::Seek {
            handle: number(args.next(), "handle")?,
            delta: number(args.next(), "delta")?,
            whence: whence(args.next())?,
        },
        "hexdump" => Command::Hexdump {
            id: number(args.next(), "id")?,
            offset: args
                .next()
                .map(|v| number(Some(v), "offset"))
                .transpose()?
                .unwrap_or(0),
            len: args
                .next()
                .map(|v| number(Some(v), "len"))
                .transpose()?
                .unwrap_or(DEFAULT_HEXDUMP_LEN),
        },
        "attr" => {
            let (id, rest) = split_word(rest);
            let id = number(Some(id), "id")?;
            let (name, text) = split_word(rest);
            if name.is_empty() {
                bail!("missing attribute name");
            }
            let attr = Attribute::from_name(name)
                .ok_or_else(|| anyhow!("unknown attribute {name:?}"))?;
            let text = text.trim();
            if text.is_empty() {
                Command::AttrShow { id, attr }
            } else {
                Command::AttrStore {
                    id,
                    attr,
                    text: text.to_string(),
                }
            }
        }
        "mmap-test" => Command::MmapTest {
            id: number(args.next(), "id")?,
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command {other:?} (try `help`)"),
    };
    Ok(Some(command))
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

fn number<T: std::str::FromStr>(value: Option<&str>, what: &str) -> Result<T> {
    let value = value.with_context(|| format!("missing {what}"))?;
    value
        .parse()
        .map_err(|_| anyhow!("invalid {what} {value:?}"))
}

fn mode(value: Option<&str>) -> Result<Acquire> {
    match value {
        None | Some("block") => Ok(Acquire::Blocking),
        Some("nonblock") => Ok(Acquire::NonBlocking),
        Some(other) => bail!("invalid mode {other:?} (expected block or nonblock)"),
    }
}

fn whence(value: Option<&str>) -> Result<Whence> {
    match value.context("missing whence")? {
        "set" | "start" => Ok(Whence::Start),
        "cur" | "current" => Ok(Whence::Current),
        "end" => Ok(Whence::End),
        raw => {
            let raw: i32 = raw
                .parse()
                .map_err(|_| anyhow!("invalid whence {raw:?}"))?;
            Ok(Whence::try_from(raw)?)
        }
    }
}
