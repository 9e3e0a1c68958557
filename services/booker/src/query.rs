//! Game server queries (A2S_INFO over UDP).
//!
//! The watchdogs only need the player count and the server keywords, but
//! the full info header is parsed so malformed replies are rejected early.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::trace;

const SIMPLE_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const INFO_REQUEST: &[u8] = b"TSource Engine Query\0";
const CHALLENGE_RESPONSE: u8 = 0x41;
const INFO_RESPONSE: u8 = 0x49;

const EDF_PORT: u8 = 0x80;
const EDF_STEAM_ID: u8 = 0x10;
const EDF_SOURCE_TV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAME_ID: u8 = 0x01;

/// Query failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query to {0} timed out")]
    Timeout(String),

    #[error("socket error: {0}")]
    Io(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Subset of A2S_INFO the bot cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub map: String,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub keywords: Vec<String>,
}

impl ServerInfo {
    /// Players that are not bots (SourceTV counts as a bot).
    pub fn humans(&self) -> u32 {
        u32::from(self.players.saturating_sub(self.bots))
    }

    /// Whether any keyword contains one of `markers` (case-insensitive).
    pub fn has_keyword(&self, markers: &[String]) -> bool {
        self.keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            markers
                .iter()
                .any(|marker| keyword.contains(&marker.to_lowercase()))
        })
    }
}

#[async_trait]
pub trait GameQuery: Send + Sync {
    async fn info(&self, address: &str) -> Result<ServerInfo, QueryError>;
}

/// UDP A2S client.
pub struct A2sQuery {
    timeout: Duration,
}

impl A2sQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(&self, address: &str) -> Result<ServerInfo, QueryError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| QueryError::Io(e.to_string()))?;
        socket
            .connect(address)
            .await
            .map_err(|e| QueryError::Io(e.to_string()))?;

        let mut request = info_request(None);
        let mut buf = [0u8; 1400];

        // One challenge round-trip at most.
        for _ in 0..2 {
            socket
                .send(&request)
                .await
                .map_err(|e| QueryError::Io(e.to_string()))?;
            let len = socket
                .recv(&mut buf)
                .await
                .map_err(|e| QueryError::Io(e.to_string()))?;

            match parse_reply(&buf[..len])? {
                Reply::Challenge(challenge) => {
                    trace!(address = %address, "A2S challenge received");
                    request = info_request(Some(challenge));
                }
                Reply::Info(info) => return Ok(info),
            }
        }

        Err(QueryError::Malformed("repeated challenge".into()))
    }
}

#[async_trait]
impl GameQuery for A2sQuery {
    async fn info(&self, address: &str) -> Result<ServerInfo, QueryError> {
        tokio::time::timeout(self.timeout, self.exchange(address))
            .await
            .map_err(|_| QueryError::Timeout(address.to_string()))?
    }
}

fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut request = Vec::with_capacity(29);
    request.extend_from_slice(&SIMPLE_HEADER);
    request.extend_from_slice(INFO_REQUEST);
    if let Some(challenge) = challenge {
        request.extend_from_slice(&challenge);
    }
    request
}

enum Reply {
    Challenge([u8; 4]),
    Info(ServerInfo),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], QueryError> {
        let end = self.pos + n;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| QueryError::Malformed(format!("truncated at byte {}", self.pos)))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, QueryError> {
        Ok(self.bytes(1)?[0])
    }

    fn skip(&mut self, n: usize) -> Result<(), QueryError> {
        self.bytes(n).map(|_| ())
    }

    fn cstring(&mut self) -> Result<String, QueryError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| QueryError::Malformed("unterminated string".into()))?;
        let value = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(value)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

fn parse_reply(data: &[u8]) -> Result<Reply, QueryError> {
    let mut r = Reader::new(data);
    if r.bytes(4)? != SIMPLE_HEADER {
        return Err(QueryError::Malformed("split or unknown packet header".into()));
    }

    match r.u8()? {
        CHALLENGE_RESPONSE => {
            let mut challenge = [0u8; 4];
            challenge.copy_from_slice(r.bytes(4)?);
            Ok(Reply::Challenge(challenge))
        }
        INFO_RESPONSE => parse_info(&mut r).map(Reply::Info),
        other => Err(QueryError::Malformed(format!("unexpected response type 0x{other:02x}"))),
    }
}

fn parse_info(r: &mut Reader<'_>) -> Result<ServerInfo, QueryError> {
    let _protocol = r.u8()?;
    let name = r.cstring()?;
    let map = r.cstring()?;
    let _folder = r.cstring()?;
    let _game = r.cstring()?;
    r.skip(2)?; // app id
    let players = r.u8()?;
    let max_players = r.u8()?;
    let bots = r.u8()?;
    r.skip(4)?; // server type, environment, visibility, vac
    let _version = r.cstring()?;

    let mut keywords = Vec::new();
    if !r.is_empty() {
        let edf = r.u8()?;
        if edf & EDF_PORT != 0 {
            r.skip(2)?;
        }
        if edf & EDF_STEAM_ID != 0 {
            r.skip(8)?;
        }
        if edf & EDF_SOURCE_TV != 0 {
            r.skip(2)?;
            r.cstring()?;
        }
        if edf & EDF_KEYWORDS != 0 {
            keywords = r
                .cstring()?
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if edf & EDF_GAME_ID != 0 {
            r.skip(8)?;
        }
    }

    Ok(ServerInfo {
        name,
        map,
        players,
        max_players,
        bots,
        keywords,
    })
}

/// Scripted query results keyed by address.
#[derive(Default)]
pub struct MockQuery {
    responses: Mutex<HashMap<String, Result<ServerInfo, QueryError>>>,
}

impl MockQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, response: Result<ServerInfo, QueryError>) {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(address.to_string(), response);
    }

    /// Respond with `players` humans and the given keywords.
    pub fn set_players(&self, address: &str, players: u8, keywords: &[&str]) {
        self.set(
            address,
            Ok(ServerInfo {
                players,
                max_players: 24,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                ..ServerInfo::default()
            }),
        );
    }
}

#[async_trait]
impl GameQuery for MockQuery {
    async fn info(&self, address: &str) -> Result<ServerInfo, QueryError> {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(address)
            .cloned()
            .unwrap_or_else(|| Err(QueryError::Timeout(address.to_string())))
    }
}
