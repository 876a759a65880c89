use crate::chat::StreamChunk;
use crate::client::AgentClient;
use crate::error::CollabError;
use futures::stream::{self, BoxStream, StreamExt};
use http::Request;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Open a streaming chat call against `client` and return a lazy, single-consumer,
/// non-restartable sequence of chunks (C2). The caller supplies `deadline`; once
/// it elapses the in-flight future is dropped, releasing the connection.
pub async fn stream_http_chat(
    client: &AgentClient,
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    deadline: Duration,
) -> Result<BoxStream<'static, Result<StreamChunk, CollabError>>, CollabError> {
    let request = client.adapter.build_request(
        &client.base_url,
        &client.api_key,
        model,
        system_prompt,
        user_prompt,
    )?;

    let http_client = reqwest::Client::new();
    let response = send_request(&http_client, request).await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        let message = String::from_utf8_lossy(&body).into_owned();
        return Err(classify_http_failure(status.as_u16(), message));
    }

    let byte_stream = response.bytes_stream().map(|r| r.map_err(CollabError::from));

    let state = StreamState {
        byte_stream: Box::pin(byte_stream),
        buffer: String::new(),
        pending: VecDeque::new(),
        adapter: client.adapter.clone(),
        deadline: Instant::now() + deadline,
        produced_any: false,
        done: false,
    };

    Ok(Box::pin(stream::unfold(state, step)))
}

struct StreamState {
    byte_stream: BoxStream<'static, Result<bytes::Bytes, CollabError>>,
    buffer: String,
    pending: VecDeque<StreamChunk>,
    adapter: std::sync::Arc<dyn crate::client::HttpChatProvider>,
    deadline: Instant,
    produced_any: bool,
    done: bool,
}

async fn step(mut st: StreamState) -> Option<(Result<StreamChunk, CollabError>, StreamState)> {
    loop {
        if let Some(chunk) = st.pending.pop_front() {
            st.produced_any = true;
            return Some((Ok(chunk), st));
        }
        if st.done {
            return None;
        }

        if let Some(pos) = st.buffer.find("\n\n") {
            let event: String = st.buffer.drain(..pos + 2).collect();
            match st.adapter.parse_stream_chunk(event.as_bytes()) {
                Ok(chunks) => {
                    st.pending.extend(chunks);
                    continue;
                }
                Err(e) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
            }
        }

        let remaining = st.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            st.done = true;
            return Some((Err(CollabError::GlobalDeadlineExceeded), st));
        }

        match tokio::time::timeout(remaining, st.byte_stream.next()).await {
            Ok(Some(Ok(bytes))) => {
                st.buffer.push_str(&String::from_utf8_lossy(&bytes));
                continue;
            }
            Ok(Some(Err(e))) => {
                st.done = true;
                return Some((Err(e), st));
            }
            Ok(None) => {
                st.done = true;
                if !st.produced_any {
                    // Empty-body substitution rule (§4.2): never hand the
                    // workflow engine a zero-length result.
                    return Some((
                        Ok(StreamChunk::Text(
                            "[provider returned an empty response]".to_string(),
                        )),
                        st,
                    ));
                }
                return None;
            }
            Err(_elapsed) => {
                st.done = true;
                return Some((Err(CollabError::GlobalDeadlineExceeded), st));
            }
        }
    }
}

fn classify_http_failure(status: u16, body: String) -> CollabError {
    match status {
        401 | 403 => CollabError::ProviderAuthFailed {
            provider: String::new(),
            message: body,
        },
        429 | 500..=599 => CollabError::ProviderTransient {
            provider: String::new(),
            message: format!("status {status}: {body}"),
        },
        _ => CollabError::ResponseFormatError {
            message: format!("status {status}"),
            raw_response: body,
        },
    }
}

async fn send_request(
    client: &reqwest::Client,
    req: Request<Vec<u8>>,
) -> Result<reqwest::Response, CollabError> {
    let method = req
        .method()
        .as_str()
        .parse::<reqwest::Method>()
        .map_err(|e| CollabError::BadRequest(e.to_string()))?;

    let mut builder = client.request(method, req.uri().to_string());
    for (name, value) in req.headers().iter() {
        if let Ok(val) = value.to_str() {
            builder = builder.header(name.as_str(), val);
        }
    }

    builder
        .body(req.into_body())
        .send()
        .await
        .map_err(CollabError::from)
}
