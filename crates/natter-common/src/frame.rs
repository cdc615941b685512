//! natter envelope serialization and parsing.
//!
//! Every WebSocket binary message carries exactly one [`Envelope`]. The first
//! byte is the kind tag, the second a flag byte announcing the optional
//! sections, followed by a big-endian timestamp and u32-length-prefixed
//! UTF-8 strings.
//!
//! ```text
//! u8 tag | u8 flags | u64 timestamp | str from | str to | str content
//!   [str token]                                        if FLAG_TOKEN
//!   [str filename | u64 size | str mime_type | str caption]  if FLAG_FILE
//! ```

use thiserror::Error;

/// LOGIN: client → server handshake, and server → client acknowledgement.
pub const TYPE_LOGIN: u8 = 0x01;
/// CHAT: plain text message.
pub const TYPE_CHAT: u8 = 0x10;
/// EMOJI: emoji message.
pub const TYPE_EMOJI: u8 = 0x11;
/// IMAGE: image reference, usually with file metadata.
pub const TYPE_IMAGE: u8 = 0x12;
/// FILE: file reference with file metadata.
pub const TYPE_FILE: u8 = 0x13;
/// ERROR: server → client failure report.
pub const TYPE_ERROR: u8 = 0xE0;
/// NOTIFICATION (friend request): side-channel push.
pub const TYPE_NOTICE_FRIEND_REQUEST: u8 = 0xE1;
/// NOTIFICATION (chat alert): side-channel push.
pub const TYPE_NOTICE_CHAT_ALERT: u8 = 0xE2;

/// Flag bit: a token section follows the content.
pub const FLAG_TOKEN: u8 = 0b0000_0001;
/// Flag bit: a file metadata section follows.
pub const FLAG_FILE: u8 = 0b0000_0010;
const KNOWN_FLAGS: u8 = FLAG_TOKEN | FLAG_FILE;

/// Maximum encoded envelope size in bytes (256 KiB).
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Fixed header: tag + flags + timestamp.
const HEADER_LEN: usize = 1 + 1 + 8;

/// Side-channel notification sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notice {
    /// Someone sent the recipient a friend request.
    FriendRequest,
    /// A chat-class message was delivered to the recipient.
    ChatAlert,
}

/// Envelope kind. Closed set; unknown wire tags fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Handshake request or acknowledgement.
    Login,
    /// Text message.
    Chat,
    /// Emoji message.
    Emoji,
    /// Image reference.
    Image,
    /// File reference.
    File,
    /// Error report.
    Error,
    /// Best-effort notification push.
    Notification(Notice),
}

impl Kind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Login => TYPE_LOGIN,
            Self::Chat => TYPE_CHAT,
            Self::Emoji => TYPE_EMOJI,
            Self::Image => TYPE_IMAGE,
            Self::File => TYPE_FILE,
            Self::Error => TYPE_ERROR,
            Self::Notification(Notice::FriendRequest) => TYPE_NOTICE_FRIEND_REQUEST,
            Self::Notification(Notice::ChatAlert) => TYPE_NOTICE_CHAT_ALERT,
        }
    }

    /// Maps a wire tag back to a kind.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TYPE_LOGIN => Some(Self::Login),
            TYPE_CHAT => Some(Self::Chat),
            TYPE_EMOJI => Some(Self::Emoji),
            TYPE_IMAGE => Some(Self::Image),
            TYPE_FILE => Some(Self::File),
            TYPE_ERROR => Some(Self::Error),
            TYPE_NOTICE_FRIEND_REQUEST => Some(Self::Notification(Notice::FriendRequest)),
            TYPE_NOTICE_CHAT_ALERT => Some(Self::Notification(Notice::ChatAlert)),
            _ => None,
        }
    }

    /// Short lowercase name, used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Chat => "chat",
            Self::Emoji => "emoji",
            Self::Image => "image",
            Self::File => "file",
            Self::Error => "error",
            Self::Notification(Notice::FriendRequest) => "friend_request",
            Self::Notification(Notice::ChatAlert) => "chat_alert",
        }
    }

    /// `true` for the chat-class kinds a client may address to a peer.
    #[must_use]
    pub const fn is_routable(self) -> bool {
        matches!(self, Self::Chat | Self::Emoji | Self::Image | Self::File)
    }
}

/// Metadata attached to image and file messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMeta {
    /// Original file name.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Optional caption shown with the file.
    pub caption: String,
}

/// One natter wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// What the frame is.
    pub kind: Kind,
    /// Sender identity. Overwritten by the server on every authenticated frame.
    pub from: String,
    /// Recipient identity; empty when unaddressed.
    pub to: String,
    /// Message body or human-readable status text.
    pub content: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Bearer token, present on handshake frames only.
    pub token: Option<String>,
    /// File metadata for image/file messages.
    pub file: Option<FileMeta>,
}

/// Errors that can occur during envelope parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The input byte slice was empty.
    #[error("frame is empty")]
    Empty,
    /// The input ended before the declared section.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum byte count needed at the point of failure.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: max {max}, got {actual}")]
    TooLarge {
        /// Maximum allowed frame size.
        max: usize,
        /// Actual frame size received.
        actual: usize,
    },
    /// The first byte does not match any known kind.
    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),
    /// The flag byte has bits this version does not understand.
    #[error("unknown flag bits 0x{0:02x}")]
    UnknownFlags(u8),
    /// A string field is not valid UTF-8.
    #[error("field `{0}` is not valid utf-8")]
    InvalidUtf8(&'static str),
    /// Bytes remain after the last declared section.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

impl Envelope {
    /// Creates an envelope of the given kind with empty fields.
    #[must_use]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            from: String::new(),
            to: String::new(),
            content: String::new(),
            timestamp: 0,
            token: None,
            file: None,
        }
    }

    /// Creates a handshake frame carrying `token`.
    #[must_use]
    pub fn login(token: &str) -> Self {
        Self {
            token: Some(token.to_owned()),
            ..Self::new(Kind::Login)
        }
    }

    /// Creates the server's handshake acknowledgement for `uid`.
    #[must_use]
    pub fn login_ack(uid: &str, content: &str, timestamp: u64) -> Self {
        Self {
            to: uid.to_owned(),
            content: content.to_owned(),
            timestamp,
            ..Self::new(Kind::Login)
        }
    }

    /// Creates an `error` frame with the given text.
    #[must_use]
    pub fn error(content: &str, timestamp: u64) -> Self {
        Self {
            content: content.to_owned(),
            timestamp,
            ..Self::new(Kind::Error)
        }
    }

    /// Creates an addressed message of a chat-class kind.
    #[must_use]
    pub fn message(kind: Kind, to: &str, content: &str, timestamp: u64) -> Self {
        Self {
            to: to.to_owned(),
            content: content.to_owned(),
            timestamp,
            ..Self::new(kind)
        }
    }

    /// Creates a `chat` message.
    #[must_use]
    pub fn chat(to: &str, content: &str, timestamp: u64) -> Self {
        Self::message(Kind::Chat, to, content, timestamp)
    }

    /// Sets the sender field.
    #[must_use]
    pub fn with_from(mut self, from: &str) -> Self {
        from.clone_into(&mut self.from);
        self
    }

    /// Attaches file metadata.
    #[must_use]
    pub fn with_file(mut self, file: FileMeta) -> Self {
        self.file = Some(file);
        self
    }

    /// Returns the wire tag of this envelope.
    #[must_use]
    pub const fn frame_type(&self) -> u8 {
        self.kind.tag()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.token.is_some() {
            flags |= FLAG_TOKEN;
        }
        if self.file.is_some() {
            flags |= FLAG_FILE;
        }
        flags
    }

    fn encoded_len(&self) -> usize {
        let mut len = HEADER_LEN + 12 + self.from.len() + self.to.len() + self.content.len();
        if let Some(token) = &self.token {
            len += 4 + token.len();
        }
        if let Some(file) = &self.file {
            len += 12 + 8 + file.filename.len() + file.mime_type.len() + file.caption.len();
        }
        len
    }

    /// Serializes this envelope into a byte vector for WebSocket transmission.
    ///
    /// # Examples
    ///
    /// ```
    /// use natter_common::frame::{Envelope, TYPE_CHAT};
    /// let bytes = Envelope::chat("bob", "hello", 0).serialize();
    /// assert_eq!(bytes[0], TYPE_CHAT);
    /// ```
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.encoded_len());
        v.push(self.kind.tag());
        v.push(self.flags());
        v.extend_from_slice(&self.timestamp.to_be_bytes());
        put_str(&mut v, &self.from);
        put_str(&mut v, &self.to);
        put_str(&mut v, &self.content);
        if let Some(token) = &self.token {
            put_str(&mut v, token);
        }
        if let Some(file) = &self.file {
            put_str(&mut v, &file.filename);
            v.extend_from_slice(&file.size.to_be_bytes());
            put_str(&mut v, &file.mime_type);
            put_str(&mut v, &file.caption);
        }
        v
    }

    /// Parses a byte slice into a typed [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the data is empty, oversized, truncated,
    /// carries an unknown tag or flag, contains invalid UTF-8, or has
    /// trailing bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use natter_common::frame::Envelope;
    /// let frame = Envelope::chat("bob", "hello", 42);
    /// let parsed = Envelope::parse(&frame.serialize()).unwrap();
    /// assert_eq!(frame, parsed);
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                max: MAX_FRAME_SIZE,
                actual: data.len(),
            });
        }
        let kind = Kind::from_tag(data[0]).ok_or(FrameError::UnknownType(data[0]))?;
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }
        let flags = data[1];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(FrameError::UnknownFlags(flags & !KNOWN_FLAGS));
        }

        let mut r = Reader { data, pos: 2 };
        let timestamp = r.u64()?;
        let from = r.str("from")?;
        let to = r.str("to")?;
        let content = r.str("content")?;
        let token = if flags & FLAG_TOKEN != 0 {
            Some(r.str("token")?)
        } else {
            None
        };
        let file = if flags & FLAG_FILE != 0 {
            Some(FileMeta {
                filename: r.str("filename")?,
                size: r.u64()?,
                mime_type: r.str("mime_type")?,
                caption: r.str("caption")?,
            })
        } else {
            None
        };
        if r.remaining() != 0 {
            return Err(FrameError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            kind,
            from,
            to,
            content,
            timestamp,
            token,
            file,
        })
    }
}

// Lengths above u32::MAX cannot occur: parsed frames are capped at
// MAX_FRAME_SIZE and server-built frames reuse parsed or constant text.
#[allow(clippy::cast_possible_truncation)]
fn put_str(v: &mut Vec<u8>, s: &str) {
    v.extend_from_slice(&(s.len() as u32).to_be_bytes());
    v.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8], FrameError> {
        if self.remaining() < n {
            return Err(FrameError::TooShort {
                expected: self.pos.saturating_add(n),
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64, FrameError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn str(&mut self, field: &'static str) -> Result<String, FrameError> {
        let mut len = [0u8; 4];
        len.copy_from_slice(self.take(4)?);
        let len = u32::from_be_bytes(len) as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| FrameError::InvalidUtf8(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Envelope {
        Envelope::message(Kind::Image, "bob", "/uploads/cat.png", 1_700_000_000).with_file(
            FileMeta {
                filename: "cat.png".into(),
                size: 48_213,
                mime_type: "image/png".into(),
                caption: "my cat".into(),
            },
        )
    }

    #[test]
    fn chat_frame_layout() {
        let bytes = Envelope::chat("bob", "hi", 7).with_from("alice").serialize();

        assert_eq!(bytes[0], TYPE_CHAT);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[2..10], &7u64.to_be_bytes());
        assert_eq!(&bytes[10..14], &5u32.to_be_bytes());
        assert_eq!(&bytes[14..19], b"alice");
    }

    #[test]
    fn login_frame_sets_token_flag() {
        let bytes = Envelope::login("tok").serialize();
        assert_eq!(bytes[0], TYPE_LOGIN);
        assert_eq!(bytes[1], FLAG_TOKEN);
        let parsed = Envelope::parse(&bytes).unwrap();
        assert_eq!(parsed.token.as_deref(), Some("tok"));
        assert!(parsed.file.is_none());
    }

    #[test]
    fn file_metadata_survives_parse() {
        let frame = image();
        let parsed = Envelope::parse(&frame.serialize()).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.file.unwrap().size, 48_213);
    }

    #[test]
    fn empty_frame_is_error() {
        assert_eq!(Envelope::parse(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn unknown_type_is_error() {
        assert_eq!(
            Envelope::parse(&[0x7F, 0, 0, 0]),
            Err(FrameError::UnknownType(0x7F))
        );
    }

    #[test]
    fn unknown_flags_are_error() {
        let mut bytes = Envelope::chat("bob", "hi", 0).serialize();
        bytes[1] = 0x80;
        assert_eq!(Envelope::parse(&bytes), Err(FrameError::UnknownFlags(0x80)));
    }

    #[test]
    fn truncated_header_is_error() {
        let result = Envelope::parse(&[TYPE_CHAT, 0, 0]);
        assert!(matches!(result, Err(FrameError::TooShort { .. })));
    }

    #[test]
    fn truncated_string_is_error() {
        let bytes = Envelope::chat("bob", "hello", 0).serialize();
        let result = Envelope::parse(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(FrameError::TooShort { .. })));
    }

    #[test]
    fn declared_length_beyond_input_is_error() {
        let mut bytes = Envelope::chat("", "", 0).serialize();
        bytes[10..14].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            Envelope::parse(&bytes),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_error() {
        let mut bytes = Envelope::chat("bob", "hi", 0).serialize();
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(Envelope::parse(&bytes), Err(FrameError::TrailingBytes(3)));
    }

    #[test]
    fn invalid_utf8_names_the_field() {
        let mut bytes = Envelope::chat("bob", "ab", 0).serialize();
        let last = bytes.len() - 1;
        bytes[last] = 0xFF;
        assert_eq!(
            Envelope::parse(&bytes),
            Err(FrameError::InvalidUtf8("content"))
        );
    }

    #[test]
    fn oversized_frame_is_error() {
        let bytes = vec![TYPE_CHAT; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            Envelope::parse(&bytes),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn every_kind_maps_to_its_tag_and_back() {
        let kinds = [
            Kind::Login,
            Kind::Chat,
            Kind::Emoji,
            Kind::Image,
            Kind::File,
            Kind::Error,
            Kind::Notification(Notice::FriendRequest),
            Kind::Notification(Notice::ChatAlert),
        ];
        for kind in kinds {
            assert_eq!(Kind::from_tag(kind.tag()), Some(kind), "{}", kind.as_str());
        }
    }

    #[test]
    fn only_chat_class_kinds_are_routable() {
        assert!(Kind::Chat.is_routable());
        assert!(Kind::Emoji.is_routable());
        assert!(Kind::Image.is_routable());
        assert!(Kind::File.is_routable());
        assert!(!Kind::Login.is_routable());
        assert!(!Kind::Error.is_routable());
        assert!(!Kind::Notification(Notice::ChatAlert).is_routable());
    }

    #[test]
    fn encoded_len_matches_serialized_len() {
        let mut frame = image();
        frame.token = Some("t".into());
        assert_eq!(frame.encoded_len(), frame.serialize().len());
    }
}
