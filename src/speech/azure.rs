//! # Azure Speech Backend
//!
//! [`SpeechBackend`] implementation on top of the Azure Speech REST APIs.
//!
//! ## Recognition:
//! The push stream is sent as a chunked request body to the short-audio
//! endpoint, prefixed with a WAV header of unknown length. The service answers
//! once the body ends with a single JSON document whose `RecognitionStatus`
//! determines the result reason.
//!
//! ## Synthesis:
//! Text is wrapped in SSML and posted to the TTS endpoint; the response body is
//! streamed back chunk by chunk in the configured output format.

use super::{
    AudioByteStream, BackendError, RecognitionEvent, RecognitionResult, SpeechBackend,
};
use crate::audio::container;
use crate::audio::stream::AudioInputStream;
use crate::config::SpeechConfig;
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OUTPUT_FORMAT_HEADER: &str = "X-Microsoft-OutputFormat";

/// Client for the Azure Speech service.
pub struct AzureSpeechBackend {
    client: reqwest::Client,
    config: SpeechConfig,
    sample_rate: u32,
}

impl AzureSpeechBackend {
    /// `sample_rate` is the rate of the PCM audio written to push streams.
    pub fn new(config: SpeechConfig, sample_rate: u32) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            sample_rate,
        })
    }

    fn recognition_url(&self) -> String {
        let base = match &self.config.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.stt.speech.microsoft.com", self.config.region),
        };
        format!("{}/speech/recognition/conversation/cognitiveservices/v1", base)
    }

    fn synthesis_url(&self) -> String {
        let base = match &self.config.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.tts.speech.microsoft.com", self.config.region),
        };
        format!("{}/cognitiveservices/v1", base)
    }

    fn ssml(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'>{text}</voice></speak>",
            lang = escape_xml(&self.config.language),
            voice = escape_xml(&self.config.voice),
            text = escape_xml(text),
        )
    }
}

#[async_trait]
impl SpeechBackend for AzureSpeechBackend {
    fn name(&self) -> &str {
        "azure"
    }

    async fn recognize_once(
        &self,
        audio: AudioInputStream,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<RecognitionResult, BackendError> {
        let header = container::streaming_header(self.sample_rate, 1, 16);
        let body = stream::iter([Ok::<Bytes, std::io::Error>(header)])
            .chain(audio.map(Ok::<Bytes, std::io::Error>));

        let response = self
            .client
            .post(self.recognition_url())
            .query(&[("language", self.config.language.as_str()), ("format", "simple")])
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.subscription_key)
            .header(
                CONTENT_TYPE,
                format!("audio/wav; codecs=audio/pcm; samplerate={}", self.sample_rate),
            )
            .header(ACCEPT, "application/json")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let parsed: ShortAudioResponse = response.json().await?;
        debug!(status = %parsed.recognition_status, "Recognition response received");

        let result = parsed.into_result()?;
        // The receiver may already be gone if the session was abandoned.
        let _ = events.send(RecognitionEvent::Recognized(result.clone()));
        Ok(result)
    }

    async fn synthesize(&self, text: &str) -> Result<AudioByteStream, BackendError> {
        let response = self
            .client
            .post(self.synthesis_url())
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.subscription_key)
            .header(CONTENT_TYPE, "application/ssml+xml")
            .header(OUTPUT_FORMAT_HEADER, &self.config.output_format)
            .body(self.ssml(text))
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(Box::pin(response.bytes_stream().map_err(BackendError::from)))
    }
}

/// Body of a short-audio recognition response (`format=simple`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShortAudioResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
}

impl ShortAudioResponse {
    fn into_result(self) -> Result<RecognitionResult, BackendError> {
        match self.recognition_status.as_str() {
            "Success" => Ok(RecognitionResult::recognized(self.display_text)),
            "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Ok(RecognitionResult::no_match()),
            other => Err(BackendError::Rejected(other.to_string())),
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Speech service request failed");
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::speech::ResultReason;

    fn backend(endpoint: Option<&str>) -> AzureSpeechBackend {
        let mut config = AppConfig::default().speech;
        config.region = "westeurope".to_string();
        config.endpoint = endpoint.map(str::to_string);
        AzureSpeechBackend::new(config, 16000).unwrap()
    }

    #[test]
    fn test_regional_urls() {
        let backend = backend(None);
        assert_eq!(
            backend.recognition_url(),
            "https://westeurope.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1"
        );
        assert_eq!(
            backend.synthesis_url(),
            "https://westeurope.tts.speech.microsoft.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let backend = backend(Some("http://localhost:5000/"));
        assert_eq!(
            backend.recognition_url(),
            "http://localhost:5000/speech/recognition/conversation/cognitiveservices/v1"
        );
        assert_eq!(backend.synthesis_url(), "http://localhost:5000/cognitiveservices/v1");
    }

    #[test]
    fn test_ssml_escapes_text() {
        let ssml = backend(None).ssml("Tom & Jerry <3 \"quotes\"");
        assert!(ssml.contains("Tom &amp; Jerry &lt;3 &quot;quotes&quot;"));
        assert!(ssml.contains("name='en-US-JennyNeural'"));
        assert!(ssml.starts_with("<speak version='1.0' xml:lang='en-US'>"));
    }

    #[test]
    fn test_recognition_status_mapping() {
        let parse = |json: &str| serde_json::from_str::<ShortAudioResponse>(json).unwrap().into_result();

        let success = parse(r#"{"RecognitionStatus":"Success","DisplayText":"Hello world.","Offset":0,"Duration":1}"#)
            .unwrap();
        assert_eq!(success.reason, ResultReason::RecognizedSpeech);
        assert_eq!(success.text, "Hello world.");

        for status in ["NoMatch", "InitialSilenceTimeout", "BabbleTimeout"] {
            let result = parse(&format!(r#"{{"RecognitionStatus":"{}"}}"#, status)).unwrap();
            assert_eq!(result.reason, ResultReason::NoMatch);
        }

        assert!(matches!(
            parse(r#"{"RecognitionStatus":"Error"}"#),
            Err(BackendError::Rejected(status)) if status == "Error"
        ));
    }
}
