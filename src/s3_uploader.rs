use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::aws;

/// Smallest part size S3 accepts for every part but the last.
pub const PART_SIZE: usize = 5 * 1024 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    pub key: String,
    pub bytes: u64,
    pub parts: usize,
    pub url: String,
}

/// Writes a live byte stream to object storage under `key`, consuming it incrementally.
#[async_trait]
pub trait StreamUploader: Send + Sync {
    async fn upload_stream(&self, key: &str, body: BoxedReader) -> Result<UploadSummary>;
}

/// Reads from `reader` until `part_size` bytes are buffered or the stream ends.
pub async fn read_part<R>(reader: &mut R, part_size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(part_size);
    while buf.len() < part_size {
        let mut limited = (&mut *reader).take((part_size - buf.len()) as u64);
        if limited.read_buf(&mut buf).await? == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}

pub struct S3Uploader {
    client: Client,
    bucket: String,
    /// Optional endpoint override (for example, "http://127.0.0.1:9000" for MinIO)
    endpoint: Option<String>,
    part_size: usize,
}

impl S3Uploader {
    /// Creates a new S3Uploader.
    ///
    /// * `bucket` - The S3 bucket name.
    /// * `endpoint` - An optional endpoint override (pass, for example, Some("http://127.0.0.1:9000")
    ///   to use a local S3-compatible service like MinIO).
    pub fn new(shared_config: &SdkConfig, bucket: &str, endpoint: Option<&str>) -> Self {
        Self::from_client(aws::s3_client(shared_config, endpoint), bucket, endpoint)
    }

    pub fn from_client(client: Client, bucket: &str, endpoint: Option<&str>) -> Self {
        S3Uploader {
            client,
            bucket: bucket.to_string(),
            endpoint: endpoint.map(|s| s.to_string()),
            part_size: PART_SIZE,
        }
    }

    /// Overrides the part size. S3 rejects non-final parts under 5 MiB.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// URL where `object_key` is available once the upload completes.
    pub fn object_url(&self, object_key: &str) -> String {
        if let Some(ref ep) = self.endpoint {
            let trimmed = ep.trim_end_matches('/');
            format!("{}/{}/{}", trimmed, self.bucket, object_key)
        } else {
            format!("https://{}.s3.amazonaws.com/{}", self.bucket, object_key)
        }
    }

    async fn put_single(&self, key: &str, body: Bytes) -> Result<UploadSummary> {
        let bytes = body.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("uploading {} to bucket {}", key, self.bucket))?;

        Ok(UploadSummary {
            key: key.to_string(),
            bytes,
            parts: 1,
            url: self.object_url(key),
        })
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut BoxedReader,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut completed = Vec::new();
        let mut bytes = 0u64;
        let mut part = first;

        loop {
            let part_number = completed.len() as i32 + 1;
            let part_len = part.len() as u64;
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .with_context(|| format!("uploading part {} of {}", part_number, key))?;
            debug!("Uploaded part {} of {} ({} bytes)", part_number, key, part_len);

            bytes += part_len;
            completed.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            part = read_part(body, self.part_size)
                .await
                .context("reading recording stream")?;
            if part.is_empty() {
                return Ok((completed, bytes));
            }
        }
    }

    async fn upload_multipart(
        &self,
        key: &str,
        first: Bytes,
        mut body: BoxedReader,
    ) -> Result<UploadSummary> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("starting multipart upload of {}", key))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| anyhow!("S3 returned no upload id for {}", key))?
            .to_string();

        let (parts, bytes) = match self.upload_parts(key, &upload_id, first, &mut body).await {
            Ok(done) => done,
            Err(e) => {
                warn!("Aborting multipart upload of {}: {:#}", key, e);
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort multipart upload of {}: {}", key, abort_err);
                }
                return Err(e);
            }
        };

        let part_count = parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("completing multipart upload of {}", key))?;

        Ok(UploadSummary {
            key: key.to_string(),
            bytes,
            parts: part_count,
            url: self.object_url(key),
        })
    }
}

#[async_trait]
impl StreamUploader for S3Uploader {
    async fn upload_stream(&self, key: &str, mut body: BoxedReader) -> Result<UploadSummary> {
        info!("Streaming upload to s3://{}/{}", self.bucket, key);
        let first = read_part(&mut body, self.part_size)
            .await
            .context("reading recording stream")?;

        // A stream shorter than one part is written in a single request.
        let summary = if first.len() < self.part_size {
            self.put_single(key, first).await?
        } else {
            self.upload_multipart(key, first, body).await?
        };

        info!(
            "Successfully uploaded {} bytes in {} part(s) to {}",
            summary.bytes, summary.parts, summary.url
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_config::BehaviorVersion;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadOutput;
    use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadOutput;
    use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
    use aws_sdk_s3::operation::put_object::PutObjectOutput;
    use aws_sdk_s3::operation::upload_part::{UploadPartError, UploadPartOutput};
    use aws_smithy_mocks::{mock, mock_client, RuleMode};
    use aws_types::region::Region;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn reader(data: &'static [u8]) -> BoxedReader {
        Box::new(data)
    }

    fn uploader(endpoint: Option<&str>) -> S3Uploader {
        let shared = SdkConfig::builder()
            .region(Region::new("us-east-1"))
            .behavior_version(BehaviorVersion::latest())
            .build();
        S3Uploader::new(&shared, "recordings", endpoint)
    }

    #[test]
    fn object_url_uses_endpoint_override() {
        let local = uploader(Some("http://127.0.0.1:9000/"));
        assert_eq!(
            local.object_url("202519-3-2025-01-09T03:05:00.mp3"),
            "http://127.0.0.1:9000/recordings/202519-3-2025-01-09T03:05:00.mp3"
        );

        let remote = uploader(None);
        assert_eq!(
            remote.object_url("a.mp3"),
            "https://recordings.s3.amazonaws.com/a.mp3"
        );
    }

    #[tokio::test]
    async fn read_part_collects_short_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            for chunk in [&b"abc"[..], b"defg", b"hij"] {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let part = read_part(&mut rx, 8).await.unwrap();
        assert_eq!(&part[..], b"abcdefgh");

        writer.await.unwrap();
        let rest = read_part(&mut rx, 8).await.unwrap();
        assert_eq!(&rest[..], b"ij");
        assert!(read_part(&mut rx, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_part_stops_at_eof() {
        let mut reader: &[u8] = b"short";
        let part = read_part(&mut reader, PART_SIZE).await.unwrap();
        assert_eq!(&part[..], b"short");
    }

    #[tokio::test]
    async fn short_stream_is_a_single_put() {
        let put = mock!(Client::put_object)
            .match_requests(|req| req.bucket() == Some("recordings") && req.key() == Some("a.mp3"))
            .then_output(|| PutObjectOutput::builder().build());
        let create = mock!(Client::create_multipart_upload)
            .then_output(|| CreateMultipartUploadOutput::builder().upload_id("u-1").build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put, &create]);

        let uploader = S3Uploader::from_client(client, "recordings", None).with_part_size(8);
        let summary = uploader.upload_stream("a.mp3", reader(b"frames")).await.unwrap();

        assert_eq!(put.num_calls(), 1);
        assert_eq!(create.num_calls(), 0);
        assert_eq!(summary.bytes, 6);
        assert_eq!(summary.parts, 1);
        assert_eq!(summary.url, "https://recordings.s3.amazonaws.com/a.mp3");
    }

    #[tokio::test]
    async fn empty_stream_still_writes_an_object() {
        let put = mock!(Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put]);

        let uploader = S3Uploader::from_client(client, "recordings", None).with_part_size(8);
        let summary = uploader.upload_stream("empty.mp3", reader(b"")).await.unwrap();

        assert_eq!(put.num_calls(), 1);
        assert_eq!(summary.bytes, 0);
        assert_eq!(summary.parts, 1);
    }

    #[tokio::test]
    async fn long_stream_uploads_ordered_parts_then_completes() {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        let create_log = log.clone();
        let create = mock!(Client::create_multipart_upload)
            .match_requests(move |req| {
                create_log.lock().unwrap().push(format!("create {}", req.key().unwrap_or_default()));
                true
            })
            .then_output(|| CreateMultipartUploadOutput::builder().upload_id("u-1").build());
        let part_log = log.clone();
        let part = mock!(Client::upload_part)
            .match_requests(move |req| {
                part_log.lock().unwrap().push(format!(
                    "part {} of {}",
                    req.part_number().unwrap_or_default(),
                    req.upload_id().unwrap_or_default()
                ));
                true
            })
            .then_output(|| UploadPartOutput::builder().e_tag("\"etag\"").build());
        let complete_log = log.clone();
        let complete = mock!(Client::complete_multipart_upload)
            .match_requests(move |req| {
                let parts: Vec<String> = req
                    .multipart_upload()
                    .map(|upload| upload.parts())
                    .unwrap_or_default()
                    .iter()
                    .map(|p| p.part_number().unwrap_or_default().to_string())
                    .collect();
                complete_log.lock().unwrap().push(format!("complete [{}]", parts.join(",")));
                true
            })
            .then_output(|| CompleteMultipartUploadOutput::builder().build());
        let put = mock!(Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let client = mock_client!(
            aws_sdk_s3,
            RuleMode::MatchAny,
            [&create, &part, &complete, &put]
        );

        let uploader = S3Uploader::from_client(client, "recordings", Some("http://127.0.0.1:9000"))
            .with_part_size(4);
        let summary = uploader
            .upload_stream("long.mp3", reader(b"0123456789"))
            .await
            .unwrap();

        assert_eq!(put.num_calls(), 0);
        assert_eq!(part.num_calls(), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "create long.mp3".to_string(),
                "part 1 of u-1".to_string(),
                "part 2 of u-1".to_string(),
                "part 3 of u-1".to_string(),
                "complete [1,2,3]".to_string(),
            ]
        );
        assert_eq!(summary.bytes, 10);
        assert_eq!(summary.parts, 3);
        assert_eq!(summary.url, "http://127.0.0.1:9000/recordings/long.mp3");
    }

    #[tokio::test]
    async fn failed_part_aborts_the_multipart_upload() {
        let create = mock!(Client::create_multipart_upload)
            .then_output(|| CreateMultipartUploadOutput::builder().upload_id("u-1").build());
        let first_part = mock!(Client::upload_part)
            .match_requests(|req| req.part_number() == Some(1))
            .then_output(|| UploadPartOutput::builder().e_tag("\"etag\"").build());
        let second_part = mock!(Client::upload_part)
            .match_requests(|req| req.part_number() == Some(2))
            .then_error(|| {
                UploadPartError::generic(
                    ErrorMetadata::builder()
                        .code("NoSuchUpload")
                        .message("The specified upload does not exist.")
                        .build(),
                )
            });
        let abort = mock!(Client::abort_multipart_upload)
            .match_requests(|req| req.upload_id() == Some("u-1") && req.key() == Some("x.mp3"))
            .then_output(|| AbortMultipartUploadOutput::builder().build());
        let complete = mock!(Client::complete_multipart_upload)
            .then_output(|| CompleteMultipartUploadOutput::builder().build());
        let client = mock_client!(
            aws_sdk_s3,
            RuleMode::MatchAny,
            [&create, &first_part, &second_part, &abort, &complete]
        );

        let uploader = S3Uploader::from_client(client, "recordings", None).with_part_size(4);
        let result = uploader.upload_stream("x.mp3", reader(b"0123456789")).await;

        assert!(result.is_err());
        assert_eq!(first_part.num_calls(), 1);
        assert_eq!(second_part.num_calls(), 1);
        assert_eq!(abort.num_calls(), 1);
        assert_eq!(complete.num_calls(), 0);
    }
}
