// src/runners/http.rs

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use reqwest::{Body, Client, Method, RequestBuilder, Response, Url};
use tokio::io::AsyncWriteExt;

use crate::config::{Entry, ExecutionRestrictions, HttpToolConfig, RunnerSettings, load_config};
use crate::errors::{Result, RunnerError};
use crate::models::{Outcome, Submission, normalize_outcome};
use crate::runners::{ToolRunner, settle};
use crate::template::{ResponseTokens, Template};

const JSON_MIME: &str = "application/json";
const FORM_MIME: &str = "application/x-www-form-urlencoded";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";
const EXCESSIVE_LENGTH: &str = "Excessive length";

/// Content type of an uploaded file, guessed from its name.
pub fn guess_mime(filename: &str) -> String {
    if let Some(mime) = mime_guess::from_path(filename).first() {
        return mime.essence_str().to_string();
    }
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".docx") {
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string()
    } else if lower.ends_with(".xlsx") {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

/// Lines for the per-attempt error file.
#[derive(Default)]
struct ErrorLog(Vec<String>);

impl ErrorLog {
    fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        warn!("HttpToolRunner: {}", line);
        self.0.push(line);
    }

    fn contents(&self) -> String {
        self.0.iter().map(|line| format!("{}\n", line)).collect()
    }
}

/// A header or parameter with its templates parsed.
struct PreparedEntry {
    key: Template,
    value: Template,
    literal: bool,
}

impl PreparedEntry {
    fn new(entry: &Entry) -> Self {
        Self {
            key: Template::parse(&entry.key),
            value: Template::parse(&entry.value),
            literal: entry.literal,
        }
    }

    fn resolve(&self, args: &[String], substitute: bool) -> (String, String) {
        if substitute && !self.literal {
            (self.key.render_request(args), self.value.render_request(args))
        } else {
            (self.key.source().to_string(), self.value.source().to_string())
        }
    }
}

/// Everything derived from the configuration once, at initialization.
struct Prepared {
    config: HttpToolConfig,
    method: Method,
    url: Template,
    file_parameter: Option<Template>,
    request_body: Option<Template>,
    headers: Vec<PreparedEntry>,
    parameters: Vec<PreparedEntry>,
    score: Option<Template>,
    response_lines: Option<Vec<Template>>,
    /// Some request field needs substitution.
    replace_request: bool,
    /// Some response field needs substitution.
    replace_response: bool,
    client: Client,
}

impl Prepared {
    fn new(config: HttpToolConfig, settings: &RunnerSettings) -> Result<Self> {
        let url = Template::parse(config.url.as_deref().unwrap_or_default());
        let file_parameter = config.file_parameter.as_deref().map(Template::parse);
        let request_body = config.request_body.as_deref().map(Template::parse);
        let headers: Vec<PreparedEntry> = config.headers.iter().map(PreparedEntry::new).collect();
        let parameters: Vec<PreparedEntry> = config.parameters.iter().map(PreparedEntry::new).collect();
        let score = config.score_template.as_deref().map(Template::parse);
        let response_lines = config
            .response_template
            .as_ref()
            .map(|lines| lines.iter().map(|line| Template::parse(line)).collect::<Vec<_>>());

        let replace_request = url.has_tokens()
            || file_parameter.as_ref().is_some_and(Template::has_tokens)
            || request_body.as_ref().is_some_and(Template::has_tokens)
            || headers.iter().chain(&parameters).any(|entry| !entry.literal);
        let replace_response = score.as_ref().is_some_and(Template::has_tokens)
            || response_lines
                .as_ref()
                .is_some_and(|lines| lines.iter().any(Template::has_tokens));

        let method = match config.request_method.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                warn!("HttpToolRunner: method {} not supported, using POST", other);
                Method::POST
            }
        };

        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .redirect(Policy::none())
            .danger_accept_invalid_certs(config.no_verify_certificate)
            .build()?;

        Ok(Self {
            config,
            method,
            url,
            file_parameter,
            request_body,
            headers,
            parameters,
            score,
            response_lines,
            replace_request,
            replace_response,
            client,
        })
    }

    fn content_type(&self, headers: &[(String, String)]) -> String {
        self.config
            .content_type
            .clone()
            .or_else(|| {
                headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
                    .map(|(_, value)| value.clone())
            })
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }

    async fn build_request(
        &self,
        submission: &Submission,
        args: &[String],
        log: &mut ErrorLog,
    ) -> Result<RequestBuilder> {
        let render = |template: &Template| {
            if self.replace_request {
                template.render_request(args)
            } else {
                template.source().to_string()
            }
        };

        let url = render(&self.url);
        let url = Url::parse(&url).map_err(|e| RunnerError::Config(format!("invalid URL '{}': {}", url, e)))?;
        let file_parameter = self.file_parameter.as_ref().map(render);
        let request_body = self.request_body.as_ref().map(render);
        let headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|entry| entry.resolve(args, self.replace_request))
            .collect();
        let parameters: Vec<(String, String)> = self
            .parameters
            .iter()
            .map(|entry| entry.resolve(args, self.replace_request))
            .collect();

        if self.method.as_str() != self.config.request_method {
            log.push("Method not supported. Using POST by default.");
        }

        let mut request = self.client.request(self.method.clone(), url);
        for (key, value) in &headers {
            request = request.header(key, value);
        }
        if self.config.json_response {
            request = request.header(ACCEPT, JSON_MIME);
        }

        if self.method == Method::GET {
            if !parameters.is_empty() {
                request = request.query(&parameters);
            }
            return Ok(request);
        }

        let content_type = self.content_type(&headers);
        let has_content_type_header = headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));

        if let Some(field) = file_parameter {
            let mut form = Form::new();
            for (key, value) in parameters {
                form = form.text(key, value);
            }
            let data = tokio::fs::read(&submission.file_path).await?;
            let part = Part::bytes(data)
                .file_name(submission.original_filename.clone())
                .mime_str(&guess_mime(&submission.original_filename))?;
            form = form.part(field, part);
            return Ok(request.multipart(form));
        }

        let body_content_type = |request: RequestBuilder| {
            // A configured header already carries the type; adding it again
            // would append a second value.
            if !has_content_type_header {
                request.header(CONTENT_TYPE, content_type.as_str())
            } else {
                request
            }
        };

        if let Some(body) = request_body {
            if !parameters.is_empty() {
                request = request.query(&parameters);
            }
            Ok(body_content_type(request).body(body))
        } else if content_type.starts_with(FORM_MIME) {
            Ok(request.form(&parameters))
        } else {
            if !parameters.is_empty() {
                request = request.query(&parameters);
            }
            let file = tokio::fs::File::open(&submission.file_path).await?;
            Ok(body_content_type(request).body(Body::from(file)))
        }
    }

    fn score(&self, status: u16, tokens: Option<&ResponseTokens>) -> Result<Outcome> {
        let Some(template) = &self.score else {
            let score = if status < 300 {
                self.config.default_score_on_success
            } else {
                self.config.default_score_on_error
            };
            return Ok(normalize_outcome(i64::from(score)));
        };
        let text = match tokens {
            Some(tokens) => template.render_response(tokens),
            None => template.source().to_string(),
        };
        text.trim()
            .parse::<i64>()
            .map(normalize_outcome)
            .map_err(|_| RunnerError::InvalidScore(text))
    }

    /// Collects header, body and JSON values of a response for substitution.
    async fn response_tokens(&self, mut response: Response, max_size: u64) -> ResponseTokens {
        let mut tokens = ResponseTokens::new();
        for (name, value) in response.headers() {
            tokens.add_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if response.content_length().is_some_and(|len| len >= max_size) {
            tokens.set_body(EXCESSIVE_LENGTH);
            return tokens;
        }

        let mut data = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    data.extend_from_slice(&chunk);
                    if data.len() as u64 > max_size {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("HttpToolRunner: error reading response body: {}", e);
                    break;
                }
            }
        }
        if data.len() as u64 > max_size {
            tokens.set_body(EXCESSIVE_LENGTH);
            return tokens;
        }

        let body = String::from_utf8_lossy(&data).into_owned();
        if self.config.json_response && content_type.starts_with(JSON_MIME) {
            if let Err(e) = tokens.add_json(&body) {
                error!("HttpToolRunner: malformed JSON response: {}\nBody:\n|{}|", e, body);
            }
        }
        tokens.set_body(body);
        tokens
    }

    async fn write_rendered(&self, submission: &Submission, tokens: Option<&ResponseTokens>) -> Result<()> {
        let mut text = String::new();
        match (&self.response_lines, tokens) {
            (Some(lines), _) => {
                for line in lines {
                    match tokens {
                        Some(tokens) => text.push_str(&line.render_response(tokens)),
                        None => text.push_str(line.source()),
                    }
                    text.push('\n');
                }
            }
            (None, Some(tokens)) => text.push_str(tokens.body()),
            (None, None) => {}
        }
        tokio::fs::write(&submission.output_path, text).await?;
        Ok(())
    }

    /// Streams the body to the output file if its declared size is acceptable.
    async fn copy_body(
        &self,
        mut response: Response,
        submission: &Submission,
        max_size: u64,
        log: &mut ErrorLog,
    ) -> Result<()> {
        match response.content_length() {
            Some(len) if len < max_size => {
                let mut file = tokio::fs::File::create(&submission.output_path).await?;
                while let Some(chunk) = response.chunk().await? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
            }
            _ => log.push("Response too big."),
        }
        Ok(())
    }

    async fn process_response(
        &self,
        response: Response,
        submission: &Submission,
        max_size: u64,
        log: &mut ErrorLog,
    ) -> Result<Outcome> {
        let status = response.status().as_u16();
        debug!("HttpToolRunner: response status {}", status);

        if self.replace_response {
            let tokens = self.response_tokens(response, max_size).await;
            let score = self.score(status, Some(&tokens));
            self.write_rendered(submission, Some(&tokens)).await?;
            score
        } else {
            let score = self.score(status, None);
            if self.response_lines.is_some() {
                self.write_rendered(submission, None).await?;
            } else {
                self.copy_body(response, submission, max_size, log).await?;
            }
            score
        }
    }

    async fn exchange(&self, submission: &Submission, max_size: u64, log: &mut ErrorLog) -> Result<Outcome> {
        let args = submission.positional_args();
        let request = self.build_request(submission, &args, log).await?;
        let response = request.send().await?;
        self.process_response(response, submission, max_size, log).await
    }
}

/// Runs a remote corrector exposed over HTTP.
///
/// The request and the interpretation of the response are described by a
/// [`HttpToolConfig`]; see [`crate::template`] for the token syntax. The
/// client and all parsed templates are built once and shared by every
/// attempt. Execution restrictions do not apply to this runner.
pub struct HttpToolRunner {
    prepared: Option<Prepared>,
    settings: RunnerSettings,
}

impl HttpToolRunner {
    /// `exe_data` is the path of the serialized [`HttpToolConfig`].
    pub fn init(exe_data: &str, restrictions: Option<&str>, settings: RunnerSettings) -> Self {
        let prepared = load_config::<HttpToolConfig>(std::path::Path::new(exe_data))
            .and_then(HttpToolConfig::validate)
            .and_then(|config| {
                debug!("HttpToolRunner: {:?}", config);
                Prepared::new(config, &settings)
            });
        let prepared = match prepared {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                error!("HttpToolRunner: error reading configuration {}: {}", exe_data, e);
                None
            }
        };

        if let Err(e) = ExecutionRestrictions::try_parse(restrictions) {
            error!("HttpToolRunner: error reading execution restrictions: {}", e);
        }

        Self { prepared, settings }
    }

    /// Whether any request field is rendered per attempt.
    pub fn replaces_request(&self) -> bool {
        self.prepared.as_ref().is_some_and(|p| p.replace_request)
    }

    /// Whether any response field is rendered from the response.
    pub fn replaces_response(&self) -> bool {
        self.prepared.as_ref().is_some_and(|p| p.replace_response)
    }

    async fn run(&self, submission: &Submission) -> Result<Outcome> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| RunnerError::NotInitialized("HTTP configuration not loaded".to_string()))?;

        let mut log = ErrorLog::default();
        let exchange = prepared.exchange(submission, self.settings.max_upload_size, &mut log);
        let result = match submission.deadline() {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or(Err(RunnerError::Timeout(limit.as_secs()))),
            None => exchange.await,
        };

        let error_output = submission.error_path(&self.settings.error_suffix);
        if let Err(e) = tokio::fs::write(&error_output, log.contents()).await {
            error!("HttpToolRunner: error writing {}: {}", error_output.display(), e);
        }
        result
    }
}

#[async_trait]
impl ToolRunner for HttpToolRunner {
    async fn execute(&self, submission: &Submission) -> Outcome {
        settle("HttpToolRunner", self.run(submission).await)
    }

    fn error_suffix(&self) -> &str {
        &self.settings.error_suffix
    }
}
