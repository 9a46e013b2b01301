//! Minimal ID3v2.3 / ID3v2.4 reader, just enough to pull the lead artist out
//! of a file without a full tagging library.

use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub const DEFAULT_ARTIST: &str = "---";

const MAGIC: &[u8] = b"ID3";
const FRAME_HEADER_LEN: u64 = 10;
const ARTIST_FRAME: &str = "TPE1";
const USER_TEXT_FRAME: &str = "TXXX";

/// Byte reader over any `Read` with pushback, so a rejected magic check
/// leaves the stream where it was.
pub struct TagReader<R> {
    inner: R,
    pending: VecDeque<u8>,
}

impl<R: Read> TagReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Ok(byte);
        }
        let mut buf = [0_u8; 1];
        self.inner
            .read_exact(&mut buf)
            .context("unexpected end of tag")?;
        Ok(buf[0])
    }

    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while (out.len() as u64) < len {
            let Some(byte) = self.pending.pop_front() else {
                break;
            };
            out.push(byte);
        }

        let remaining = len - out.len() as u64;
        if remaining > 0 {
            (&mut self.inner)
                .take(remaining)
                .read_to_end(&mut out)
                .context("failed to read tag bytes")?;
        }

        if (out.len() as u64) < len {
            anyhow::bail!("unexpected end of tag: wanted {len} bytes, got {}", out.len());
        }
        Ok(out)
    }

    /// Consumes `magic` if the stream starts with it; otherwise every byte
    /// looked at is pushed back.
    pub fn read_magic(&mut self, magic: &[u8]) -> Result<bool> {
        let mut seen = Vec::with_capacity(magic.len());
        for _ in 0..magic.len() {
            match self.read_u8() {
                Ok(byte) => seen.push(byte),
                Err(_) => break,
            }
        }

        if seen == magic {
            return Ok(true);
        }

        for byte in seen.into_iter().rev() {
            self.pending.push_front(byte);
        }
        Ok(false)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let low = self.read_u8()?;
        let high = self.read_u8()?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        let mut bytes = [0_u8; 4];
        for byte in &mut bytes {
            *byte = self.read_u8()?;
        }
        Ok(u32::from_be_bytes(bytes))
    }

    /// 28-bit value stored in four bytes, high bit of each byte ignored.
    pub fn read_synchsafe_u32(&mut self) -> Result<u32> {
        let mut value = 0_u32;
        for _ in 0..4 {
            value = (value << 7) | u32::from(self.read_u8()? & 0x7f);
        }
        Ok(value)
    }

    /// Reads `len` bytes and maps each one to the char with the same code
    /// point.
    pub fn read_text(&mut self, len: u64) -> Result<String> {
        Ok(self.read_bytes(len)?.into_iter().map(char::from).collect())
    }

    pub fn skip(&mut self, len: u64) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }
}

/// Tag header flags, bit positions numbered from the most significant bit
/// as the ID3v2 documents do, so unsynchronisation is `0x80` and not `0x01`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    fn bit(self, position: u8) -> bool {
        self.0 & (0x80 >> position) != 0
    }

    pub fn unsynchronisation(self) -> bool {
        self.bit(0)
    }

    pub fn extended_header(self) -> bool {
        self.bit(1)
    }

    pub fn experimental(self) -> bool {
        self.bit(2)
    }

    pub fn footer_present(self) -> bool {
        self.bit(3)
    }
}

impl fmt::Debug for HeaderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = [
            ("unsynchronisation", self.unsynchronisation()),
            ("extended_header", self.extended_header()),
            ("experimental", self.experimental()),
            ("footer_present", self.footer_present()),
        ];
        f.debug_list()
            .entries(named.iter().filter(|(_, set)| *set).map(|(name, _)| name))
            .finish()
    }
}

/// Frame status and format flags. ID3v2.3 and ID3v2.4 place them differently.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags {
    version: u8,
    status: u8,
    format: u8,
}

impl FrameFlags {
    pub fn new(version: u8, raw: u16) -> Self {
        let [status, format] = raw.to_le_bytes();
        Self {
            version,
            status,
            format,
        }
    }

    fn v4(self) -> bool {
        self.version == 4
    }

    fn status_bit(self, v4_mask: u8, v3_mask: u8) -> bool {
        let mask = if self.v4() { v4_mask } else { v3_mask };
        self.status & mask != 0
    }

    fn format_bit(self, v4_mask: u8, v3_mask: u8) -> bool {
        let mask = if self.v4() { v4_mask } else { v3_mask };
        self.format & mask != 0
    }

    pub fn discard_on_tag_alter(self) -> bool {
        self.status_bit(0x40, 0x80)
    }

    pub fn discard_on_file_alter(self) -> bool {
        self.status_bit(0x20, 0x40)
    }

    pub fn read_only(self) -> bool {
        self.status_bit(0x10, 0x20)
    }

    pub fn grouped(self) -> bool {
        self.format_bit(0x40, 0x20)
    }

    pub fn compression(self) -> bool {
        self.format_bit(0x08, 0x80)
    }

    pub fn encryption(self) -> bool {
        self.format_bit(0x04, 0x40)
    }

    pub fn unsynchronisation(self) -> bool {
        self.v4() && self.format & 0x02 != 0
    }

    pub fn data_length_present(self) -> bool {
        self.v4() && self.format & 0x01 != 0
    }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = [
            ("discard_on_tag_alter", self.discard_on_tag_alter()),
            ("discard_on_file_alter", self.discard_on_file_alter()),
            ("read_only", self.read_only()),
            ("grouped", self.grouped()),
            ("compression", self.compression()),
            ("encryption", self.encryption()),
            ("unsynchronisation", self.unsynchronisation()),
            ("data_length_present", self.data_length_present()),
        ];
        f.debug_list()
            .entries(named.iter().filter(|(_, set)| *set).map(|(name, _)| name))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3Tag {
    pub version: u8,
    pub flags: HeaderFlags,
    pub size: u32,
    pub frames: HashMap<String, String>,
    pub user_data: HashMap<String, String>,
}

impl Id3Tag {
    pub fn artist(&self) -> Option<&str> {
        self.frames.get(ARTIST_FRAME).map(String::as_str)
    }
}

/// Reads a tag from the start of the stream. `Ok(None)` means there is no
/// tag this reader understands; `Err` means the tag is malformed.
pub fn read_id3v2<R: Read>(reader: &mut TagReader<R>) -> Result<Option<Id3Tag>> {
    if !reader.read_magic(MAGIC)? {
        return Ok(None);
    }

    let version = reader.read_u16_le()?;
    if version != 3 && version != 4 {
        log::debug!("unsupported ID3v2 version code {version}");
        return Ok(None);
    }
    let version = version as u8;

    let flags = HeaderFlags::new(reader.read_u8()?);
    let size = reader.read_synchsafe_u32()?;
    if flags.unsynchronisation() {
        log::debug!("unsynchronised ID3v2 tags are not supported");
        return Ok(None);
    }

    let mut cursor = 0_u64;
    if flags.extended_header() {
        cursor += skip_extended_header(reader, version)?;
    }

    let mut frames = HashMap::new();
    let mut user_data = HashMap::new();

    while cursor < u64::from(size) {
        let id_bytes = reader.read_bytes(4)?;
        if id_bytes[0] == 0 {
            // padding runs to the end of the tag
            break;
        }
        let id: String = id_bytes.into_iter().map(char::from).collect();

        let frame_size = if version == 4 {
            reader.read_synchsafe_u32()?
        } else {
            reader.read_u32_be()?
        };
        let frame_flags = FrameFlags::new(version, reader.read_u16_le()?);
        if frame_size == 0 {
            anyhow::bail!("frame {id} has no room for its encoding byte");
        }

        let encoding = reader.read_u8()?;
        let payload = reader.read_bytes(u64::from(frame_size) - 1)?;
        cursor += FRAME_HEADER_LEN + u64::from(frame_size);

        if frame_flags.compression() || frame_flags.encryption() {
            log::trace!("skipping {id} frame with flags {frame_flags:?}");
            continue;
        }

        let mut text = decode_text(encoding, &payload);
        if text.ends_with('\0') {
            text.pop();
        }

        if id == USER_TEXT_FRAME {
            if let Some((key, value)) = text.split_once('\0') {
                user_data.insert(key.to_string(), value.to_string());
            }
        } else {
            frames.insert(id, text);
        }
    }

    Ok(Some(Id3Tag {
        version,
        flags,
        size,
        frames,
        user_data,
    }))
}

fn skip_extended_header<R: Read>(reader: &mut TagReader<R>, version: u8) -> Result<u64> {
    if version == 4 {
        // v2.4 counts the size field itself
        let size = reader.read_synchsafe_u32()?;
        let rest = u64::from(size)
            .checked_sub(4)
            .context("extended header shorter than its size field")?;
        reader.skip(rest)?;
        Ok(u64::from(size))
    } else {
        let size = reader.read_u32_be()?;
        reader.skip(u64::from(size))?;
        Ok(4 + u64::from(size))
    }
}

fn decode_text(encoding: u8, bytes: &[u8]) -> String {
    match encoding {
        1 => decode_utf16_with_bom(bytes),
        2 => decode_utf16(bytes, true),
        3 => String::from_utf8_lossy(bytes).into_owned(),
        _ => bytes.iter().map(|b| char::from(*b)).collect(),
    }
}

fn decode_utf16_with_bom(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, true),
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, false),
        _ => decode_utf16(bytes, false),
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// Lead artist of the file at `path`, or [`DEFAULT_ARTIST`].
pub fn parse_artist(path: &Path) -> String {
    match File::open(path) {
        Ok(file) => parse_artist_from_reader(BufReader::new(file)),
        Err(err) => {
            log::debug!("cannot open {} for tags: {err}", path.display());
            DEFAULT_ARTIST.to_string()
        }
    }
}

pub fn parse_artist_from_reader<R: Read>(reader: R) -> String {
    let mut reader = TagReader::new(reader);
    match read_id3v2(&mut reader) {
        Ok(Some(tag)) => tag
            .artist()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| DEFAULT_ARTIST.to_string()),
        Ok(None) => DEFAULT_ARTIST.to_string(),
        Err(err) => {
            log::debug!("malformed ID3v2 tag: {err:#}");
            DEFAULT_ARTIST.to_string()
        }
    }
}
