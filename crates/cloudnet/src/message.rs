//! The inter-node message envelope.

use cloudpack::Blob;
use cloudpack::Decoder;
use cloudpack::Encoder;
use cloudpack::Pack;
use cloudpack::Unpack;

/// Which nodes a message is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Target {
    #[default]
    All,
    Nodes(Vec<String>),
}

impl Target {
    pub fn includes(&self, node_id: &str) -> bool {
        match self {
            Target::All => true,
            Target::Nodes(ids) => ids.iter().any(|id| id == node_id),
        }
    }
}

/// Packed as an optional node id list; absent means all nodes.
impl Pack for Target {
    fn pack(&self, enc: &mut Encoder) -> cloudpack::Result<()> {
        match self {
            Target::All => enc.pack(&None::<Vec<String>>),
            Target::Nodes(ids) => enc.pack(&Some(ids)),
        }
    }
}

impl Unpack for Target {
    fn unpack(dec: &mut Decoder<'_>) -> cloudpack::Result<Self> {
        Ok(match dec.unpack::<Option<Vec<String>>>()? {
            None => Target::All,
            Some(ids) => Target::Nodes(ids),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Node id of the originator; filled in by the messenger.
    pub sender: String,
    pub target: Target,
    /// Namespace subscribers register under.
    pub channel: String,
    pub message: String,
    pub buffer: Blob,
}

cloudpack::record!(ChannelMessage { sender, channel, message; target, buffer });

impl ChannelMessage {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: String::new(),
            target: Target::All,
            channel: channel.into(),
            message: message.into(),
            buffer: Blob::default(),
        }
    }

    pub fn to_nodes(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.target = Target::Nodes(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn to_all(mut self) -> Self {
        self.target = Target::All;
        self
    }

    pub fn with_buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = Blob(buffer);
        self
    }

    /// Packs `value` as the message buffer.
    pub fn with_payload<T: Pack + ?Sized>(self, value: &T) -> cloudpack::Result<Self> {
        let mut enc = Encoder::new();
        enc.pack(value)?;
        Ok(self.with_buffer(enc.into_bytes()?))
    }

    pub fn payload<T: Unpack>(&self) -> cloudpack::Result<T> {
        Decoder::new(&self.buffer.0).unpack()
    }
}
