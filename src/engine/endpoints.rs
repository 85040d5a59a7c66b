//! Gemini Code Assist endpoint URLs, built once at startup: a base URL plus a fixed
//! stream/no-stream path pair, resolved once and selected per request.

use url::Url;

const GENERATE_PATH: &str = "/v1internal:generateContent";
const STREAM_PATH: &str = "/v1internal:streamGenerateContent";
const STREAM_QUERY: &str = "alt=sse";

fn build(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(query);
    url
}

#[derive(Debug, Clone)]
pub struct GeminiEndpoints {
    stream: Url,
    no_stream: Url,
}

impl GeminiEndpoints {
    pub fn new(base: &Url) -> Self {
        Self {
            stream: build(base, STREAM_PATH, Some(STREAM_QUERY)),
            no_stream: build(base, GENERATE_PATH, None),
        }
    }

    pub fn select(&self, stream: bool) -> &Url {
        if stream { &self.stream } else { &self.no_stream }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_stream_endpoint_with_sse_query() {
        let base = Url::parse("https://cloudcode-pa.googleapis.com").unwrap();
        let endpoints = GeminiEndpoints::new(&base);
        let url = endpoints.select(true);
        assert_eq!(url.path(), STREAM_PATH);
        assert_eq!(url.query(), Some(STREAM_QUERY));
    }

    #[test]
    fn selects_non_stream_endpoint_without_query() {
        let base = Url::parse("https://cloudcode-pa.googleapis.com").unwrap();
        let endpoints = GeminiEndpoints::new(&base);
        let url = endpoints.select(false);
        assert_eq!(url.path(), GENERATE_PATH);
        assert_eq!(url.query(), None);
    }
}
