//! Payload codecs.
//!
//! Node data is opaque bytes to the repository; typed access goes through a
//! [`PayloadCodec`]. [`ProstCodec`] is the default: protobuf messages are
//! field-tagged, so readers and writers on different schema revisions stay
//! compatible as long as tags are not reused.


use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Converts typed values to and from node payloads.
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(
        &self,
        value: &T,
    ) -> Result<Vec<u8>>;

    fn decode(
        &self,
        bytes: &[u8],
    ) -> Result<T>;
}

/// Protobuf codec for `prost` messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstCodec;

impl<T> PayloadCodec<T> for ProstCodec
where
    T: prost::Message + Default,
{
    fn encode(
        &self,
        value: &T,
    ) -> Result<Vec<u8>> {
        Ok(value.encode_to_vec())
    }

    fn decode(
        &self,
        bytes: &[u8],
    ) -> Result<T> {
        Ok(T::decode(bytes)?)
    }
}

/// Compact codec for serde types. Not tag based, so both sides must share
/// the exact type layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T> PayloadCodec<T> for BincodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(
        &self,
        value: &T,
    ) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(
        &self,
        bytes: &[u8],
    ) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub fn serialize<T: prost::Message>(value: &T) -> Vec<u8> {
    value.encode_to_vec()
}

pub fn deserialize<T: prost::Message + Default>(bytes: &[u8]) -> Result<T> {
    Ok(T::decode(bytes)?)
}
