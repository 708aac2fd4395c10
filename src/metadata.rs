use crate::error::{DecodeError, MetadataError};
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

pub const ICY_METADATA_HEADER: &str = "Icy-MetaData";
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// Smallest block that can hold `StreamTitle='';`.
const MIN_BLOCK_LEN: usize = 15;
const TITLE_KEY: &str = "StreamTitle=";

/// How often and how patiently the session polls a station for its title.
#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub every: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(7),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one poll, tagged with the epoch of the session that asked.
#[derive(Debug)]
pub struct PollOutcome {
    pub epoch: u64,
    pub result: Result<String, MetadataError>,
}

/// Polls `url` for its current title until the receiver goes away or the
/// station turns out not to carry inline metadata at all.
///
/// Every poll is a fresh request; this never shares a socket with playback.
pub async fn metadata_loop(
    client: Client,
    url: String,
    epoch: u64,
    settings: PollSettings,
    tx: mpsc::Sender<PollOutcome>,
) {
    let mut ticker = interval(settings.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let result = match tokio::time::timeout(settings.timeout, fetch_title(&client, &url)).await
        {
            Ok(result) => result,
            Err(_) => Err(MetadataError::Timeout),
        };

        let unsupported = matches!(result, Err(MetadataError::MissingMetaInt));
        if tx.send(PollOutcome { epoch, result }).await.is_err() {
            break;
        }
        if unsupported {
            warn!("{} has no inline metadata, title polling stopped", url);
            break;
        }
    }

    debug!("metadata polling for epoch {} finished", epoch);
}

/// Opens an independent request to `url` with inline metadata enabled and
/// reads the first title block.
pub async fn fetch_title(client: &Client, url: &str) -> Result<String, MetadataError> {
    let resp = client
        .get(url)
        .header(ICY_METADATA_HEADER, "1")
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(MetadataError::Status(resp.status()));
    }

    let meta_interval = meta_interval(resp.headers())?;

    let body = resp
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
    let reader = StreamReader::new(body);
    tokio::pin!(reader);

    let title = decode_next_title(&mut reader, meta_interval).await?;
    Ok(title)
}

pub fn meta_interval(headers: &HeaderMap) -> Result<usize, MetadataError> {
    let raw = headers
        .get(ICY_METAINT_HEADER)
        .ok_or(MetadataError::MissingMetaInt)?;
    let text = raw
        .to_str()
        .map_err(|_| MetadataError::InvalidMetaInt(String::from_utf8_lossy(raw.as_bytes()).into()))?;

    match text.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(MetadataError::InvalidMetaInt(text.to_string())),
    }
}

/// Skips `meta_interval` audio bytes, then reads one length-prefixed block
/// and returns its `StreamTitle` (empty when the block carries none).
///
/// Leaves `source` positioned right after the block.
pub async fn decode_next_title<R>(source: &mut R, meta_interval: usize) -> Result<String, DecodeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut audio = (&mut *source).take(meta_interval as u64);
    let skipped = tokio::io::copy(&mut audio, &mut tokio::io::sink()).await? as usize;
    if skipped < meta_interval {
        return Err(DecodeError::ShortRead {
            expected: meta_interval,
            got: skipped,
        });
    }

    let length = source.read_u8().await.map_err(truncated)?;
    let mut block = vec![0u8; usize::from(length) * 16];
    source.read_exact(&mut block).await.map_err(truncated)?;

    Ok(stream_title(&block))
}

fn truncated(e: io::Error) -> DecodeError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::Truncated
    } else {
        DecodeError::Io(e)
    }
}

/// Extracts the quoted `StreamTitle` value from a raw metadata block.
pub fn stream_title(block: &[u8]) -> String {
    if block.len() < MIN_BLOCK_LEN {
        return String::new();
    }

    let text = String::from_utf8_lossy(block);
    text.split(';')
        .map(|field| field.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .find_map(|field| {
            field
                .strip_prefix(TITLE_KEY)
                .and_then(|v| v.strip_prefix('\''))
                .and_then(|v| v.strip_suffix('\''))
        })
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// `metaint` filler bytes, a length byte, then `meta` NUL-padded to a
    /// multiple of 16.
    fn icy_body(metaint: usize, meta: &str) -> Vec<u8> {
        let mut body = vec![0xAAu8; metaint];
        let blocks = (meta.len() + 15) / 16;
        body.push(blocks as u8);
        let mut block = meta.as_bytes().to_vec();
        block.resize(blocks * 16, 0);
        body.extend(block);
        body
    }

    #[tokio::test]
    async fn decodes_title_and_stops_after_block() {
        let mut bytes = icy_body(64, "StreamTitle='Test Song';");
        bytes.extend_from_slice(b"next audio");
        let mut source: &[u8] = &bytes;

        let title = decode_next_title(&mut source, 64).await.unwrap();

        assert_eq!(title, "Test Song");
        assert_eq!(source, b"next audio");
    }

    #[tokio::test]
    async fn zero_length_block_is_an_empty_title() {
        let mut bytes = vec![0u8; 32];
        bytes.push(0);
        let mut source: &[u8] = &bytes;

        let title = decode_next_title(&mut source, 32).await.unwrap();
        assert_eq!(title, "");
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn short_audio_segment_is_a_short_read() {
        let bytes = vec![0u8; 10];
        let mut source: &[u8] = &bytes;

        let err = decode_next_title(&mut source, 16).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ShortRead {
                expected: 16,
                got: 10
            }
        ));
    }

    #[tokio::test]
    async fn cut_block_is_truncated() {
        let mut bytes = icy_body(8, "StreamTitle='Cut Off Somewhere';");
        bytes.truncate(bytes.len() - 5);
        let mut source: &[u8] = &bytes;
        let err = decode_next_title(&mut source, 8).await.unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));

        let no_length = vec![0u8; 8];
        let mut source: &[u8] = &no_length;
        let err = decode_next_title(&mut source, 8).await.unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));
    }

    #[test]
    fn picks_stream_title_among_other_fields() {
        let block = b"StreamUrl='http://x';  StreamTitle='Artist - Track' ;\0\0\0";
        assert_eq!(stream_title(block), "Artist - Track");
    }

    #[test]
    fn key_is_case_sensitive_and_missing_title_is_empty() {
        assert_eq!(stream_title(b"streamtitle='nope';StreamUrl='';"), "");
        assert_eq!(stream_title(b"StreamUrl='http://example.org';"), "");
    }

    #[test]
    fn metaint_header_must_be_a_positive_number() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            meta_interval(&headers),
            Err(MetadataError::MissingMetaInt)
        ));

        headers.insert(ICY_METAINT_HEADER, "16000".parse().unwrap());
        assert_eq!(meta_interval(&headers).unwrap(), 16000);

        headers.insert(ICY_METAINT_HEADER, "lots".parse().unwrap());
        assert!(matches!(
            meta_interval(&headers),
            Err(MetadataError::InvalidMetaInt(_))
        ));
    }

    #[tokio::test]
    async fn fetches_title_with_metadata_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live"))
            .and(header("Icy-MetaData", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("icy-metaint", "128")
                    .set_body_bytes(icy_body(128, "StreamTitle='Band - Song';")),
            )
            .mount(&server)
            .await;

        let title = fetch_title(&Client::new(), &format!("{}/live", server.uri()))
            .await
            .unwrap();
        assert_eq!(title, "Band - Song");
    }

    #[tokio::test]
    async fn polling_stops_when_station_has_no_metaint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        let settings = PollSettings {
            every: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
        };
        tokio::spawn(metadata_loop(Client::new(), server.uri(), 3, settings, tx));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.epoch, 3);
        assert!(matches!(outcome.result, Err(MetadataError::MissingMetaInt)));
        assert!(rx.recv().await.is_none());
    }
}
