//! SOAP action-invocation grammar and request generation.
//!
//! The grammar is not known in advance: it is fetched from the target's
//! device description and each service's SCPD document at startup, then
//! frozen into an [`Action`] catalog for the rest of the run.

use std::time::Duration;

use base64::Engine as _;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rand::{Rng, RngCore};
use rustc_hash::FxHashMap;
use tracing::info;

use super::Slots;
use crate::xml;

const GRAMMAR_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors bootstrapping or using the SOAP grammar.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The target URL could not be parsed.
    #[error(transparent)]
    Url(#[from] super::Error),
    /// An HTTP client could not be constructed.
    #[error("failed to construct http client: {0}")]
    Client(#[source] reqwest::Error),
    /// Fetching a description or SCPD document failed.
    #[error("failed to fetch {0}: {1}")]
    Fetch(String, #[source] reqwest::Error),
    /// A fetched document was not well-formed, or lacked a required node.
    #[error("failed to parse xml from {0}: {1}")]
    Xml(String, #[source] xml::Error),
    /// No usable actions were found in any service's SCPD document.
    #[error("device exposes no usable SOAP actions")]
    EmptyCatalog,
}

/// Whether an action accepts caller-supplied arguments (`In`) or is purely
/// informational (`Out`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// One argument of a SOAP action, resolved from its related state
/// variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub data_type: String,
    pub default_value: String,
    pub allowed_values: Vec<String>,
}

/// One invocable SOAP action, frozen once the grammar is bootstrapped.
#[derive(Debug, Clone)]
pub struct Action {
    pub control_url: String,
    pub service_type: String,
    pub action_name: String,
    pub direction: Direction,
    pub arguments: Vec<Argument>,
}

type StateVariable = (String, String, Vec<String>);

/// Produces SOAP requests for a device whose grammar has been bootstrapped
/// from its description and SCPD documents.
#[derive(Debug, Clone)]
pub struct Generator {
    url: String,
    base_url: String,
    host: String,
    port: u16,
    actions: Vec<Action>,
}

impl Generator {
    pub const NAME: &'static str = "soap";

    /// Creates a generator for `url`, without yet fetching anything. Call
    /// [`generate_grammar`](Self::generate_grammar) before
    /// [`request`](Self::request).
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        let url = url.into();
        let (base_url, host, port) = super::parse_url(&url)?;
        Ok(Self {
            url,
            base_url,
            host,
            port,
            actions: Vec::new(),
        })
    }

    /// Fetches the device description, then every referenced service's
    /// SCPD document, building the action catalog. Fails if the catalog
    /// ends up empty.
    pub fn generate_grammar(&mut self) -> Result<(), Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(GRAMMAR_FETCH_TIMEOUT)
            .build()
            .map_err(Error::Client)?;

        info!(url = %self.url, "requesting device description");
        let body = fetch(&client, &self.url)?;
        let doc = xml::parse(&body).map_err(|e| Error::Xml(self.url.clone(), e))?;

        for service in xml::descendants_with_tag(doc.root(), "service") {
            let scpd_url = xml::require_child_text(service, "SCPDURL")
                .map_err(|e| Error::Xml(self.url.clone(), e))?;
            let control_url = xml::require_child_text(service, "controlURL")
                .map_err(|e| Error::Xml(self.url.clone(), e))?;
            let service_type = xml::require_child_text(service, "serviceId")
                .map_err(|e| Error::Xml(self.url.clone(), e))?;

            let scpd_url = super::resolve_against_base(&self.base_url, &scpd_url);
            let control_url = super::ensure_leading_slash(&control_url);

            info!(url = %scpd_url, "requesting scpd document");
            let scpd_body = fetch(&client, &scpd_url)?;
            let scpd_doc = xml::parse(&scpd_body).map_err(|e| Error::Xml(scpd_url.clone(), e))?;

            self.process_service(scpd_doc.root(), &control_url, &service_type);
        }

        if self.actions.is_empty() {
            return Err(Error::EmptyCatalog);
        }
        Ok(())
    }

    fn process_service(&mut self, root: roxmltree::Node, control_url: &str, service_type: &str) {
        let state_variables = state_variables(root);

        for action in xml::descendants_with_tag(root, "action") {
            let Some(action_name) = xml::child_text(action, "name") else {
                continue;
            };

            let mut direction = Direction::Out;
            let mut arguments = Vec::new();

            for argument in xml::descendants_with_tag(action, "argument") {
                let Some(argument_name) = xml::child_text(argument, "name") else {
                    continue;
                };
                let Some(related) = xml::child_text(argument, "relatedStateVariable") else {
                    continue;
                };
                let Some((data_type, default_value, allowed_values)) = state_variables.get(&related)
                else {
                    continue;
                };

                arguments.push(Argument {
                    name: argument_name,
                    data_type: data_type.clone(),
                    default_value: default_value.clone(),
                    allowed_values: allowed_values.clone(),
                });

                if xml::child_text(argument, "direction").as_deref() == Some("in") {
                    direction = Direction::In;
                }
            }

            self.actions.push(Action {
                control_url: control_url.to_string(),
                service_type: service_type.to_string(),
                action_name,
                direction,
                arguments,
            });
        }
    }

    /// Prints the action catalog to stdout, mirroring `--list`.
    pub fn list(&self) {
        println!("SOAP: {}:{}", self.host, self.port);
        for action in &self.actions {
            let marker = match action.direction {
                Direction::In => ">>",
                Direction::Out => "<<",
            };
            println!(" {marker} {} - {}", action.control_url, action.service_type);
            println!(" {marker} {}#{}", action.service_type, action.action_name);
            for argument in &action.arguments {
                println!(
                    "\t{} - {} - {} - {:?}",
                    argument.name, argument.data_type, argument.default_value, argument.allowed_values
                );
            }
        }
    }

    /// A uniformly random action from the catalog, wrapped as a request.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful
    /// [`generate_grammar`](Self::generate_grammar) (the catalog would be
    /// empty).
    pub fn request(&self, rng: &mut dyn RngCore) -> Request {
        let action = &self.actions[rng.gen_range(0..self.actions.len())];
        Request {
            action: action.clone(),
            host: self.host.clone().into_bytes(),
            port: self.port.to_string().into_bytes(),
        }
    }
}

fn fetch(client: &reqwest::blocking::Client, url: &str) -> Result<String, Error> {
    let response = client
        .get(url)
        .send()
        .map_err(|e| Error::Fetch(url.to_string(), e))?;
    response.text().map_err(|e| Error::Fetch(url.to_string(), e))
}

fn state_variables(root: roxmltree::Node) -> FxHashMap<String, StateVariable> {
    let mut map = FxHashMap::default();

    for state_variable in xml::descendants_with_tag(root, "stateVariable") {
        let Some(name) = xml::child_text(state_variable, "name") else {
            continue;
        };
        let data_type = xml::child_text(state_variable, "dataType").unwrap_or_default();
        let default_value = xml::child_text(state_variable, "defaultValue").unwrap_or_default();
        let allowed_values: Vec<String> = xml::descendants_with_tag(state_variable, "allowedValue")
            .filter_map(|v| v.text().map(|t| t.trim().to_string()))
            .collect();

        map.insert(name, (data_type, default_value, allowed_values));
    }

    map
}

/// A single SOAP action invocation, not yet bound to a content length.
#[derive(Debug, Clone)]
pub struct Request {
    action: Action,
    host: Vec<u8>,
    port: Vec<u8>,
}

impl Request {
    /// The body template for this action: empty for `Out` actions.
    #[must_use]
    pub fn body(&self) -> Body {
        Body {
            action_name: self.action.action_name.clone().into_bytes(),
            service_type: self.action.service_type.clone().into_bytes(),
            arguments: self.action.arguments.clone(),
            is_in: self.action.direction == Direction::In,
        }
    }

    /// The header template for this action, bound to `content_length`
    /// (the byte length of whatever body bytes will actually be sent,
    /// possibly after mutation).
    #[must_use]
    pub fn headers(&self, content_length: usize) -> Headers {
        Headers {
            control_url: self.action.control_url.clone().into_bytes(),
            host: self.host.clone(),
            port: self.port.clone(),
            content_length: content_length.to_string().into_bytes(),
            service_type: self.action.service_type.clone().into_bytes(),
            action_name: self.action.action_name.clone().into_bytes(),
        }
    }
}

/// The SOAP envelope body, expressed as literal-and-value fragments so
/// mutation strategies can target any one of them, literal framing
/// included.
#[derive(Debug, Clone)]
pub struct Body {
    action_name: Vec<u8>,
    service_type: Vec<u8>,
    arguments: Vec<Argument>,
    is_in: bool,
}

impl Slots for Body {
    fn slots(&self, rng: &mut dyn RngCore) -> Vec<Vec<u8>> {
        if !self.is_in {
            return Vec::new();
        }

        let mut fragments = vec![
            b"<?xml version=\"1.0\"?>\n".to_vec(),
            b"<SOAP-ENV:Envelope xmlns:SOAP-ENV=\"http://schemas.xmlsoap.org/soap/envelope\" SOAP-ENV:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\n".to_vec(),
            b"<SOAP-ENV:Body>\n".to_vec(),
            b"<m:".to_vec(),
            self.action_name.clone(),
            b" ".to_vec(),
            b"xmlns:m=\"".to_vec(),
            self.service_type.clone(),
            b"\">\n".to_vec(),
        ];

        for argument in &self.arguments {
            fragments.push(b"<".to_vec());
            fragments.push(argument.name.clone().into_bytes());
            fragments.push(b">".to_vec());
            fragments.push(argument_value(argument, rng));
            fragments.push(b"</".to_vec());
            fragments.push(argument.name.clone().into_bytes());
            fragments.push(b">\n".to_vec());
        }

        fragments.push(b"</m:".to_vec());
        fragments.push(self.action_name.clone());
        fragments.push(b">\n".to_vec());
        fragments.push(b"</SOAP-ENV:Body>\n".to_vec());
        fragments.push(b"</SOAP-ENV:Envelope>\n".to_vec());

        fragments
    }

    fn finalize(&self, slots: &[Vec<u8>]) -> Vec<u8> {
        slots.concat()
    }
}

/// The `POST ... HTTP/1.1` header block, parameterized by an externally
/// supplied content length.
#[derive(Debug, Clone)]
pub struct Headers {
    control_url: Vec<u8>,
    host: Vec<u8>,
    port: Vec<u8>,
    content_length: Vec<u8>,
    service_type: Vec<u8>,
    action_name: Vec<u8>,
}

impl Slots for Headers {
    fn slots(&self, _rng: &mut dyn RngCore) -> Vec<Vec<u8>> {
        vec![
            self.control_url.clone(),
            self.host.clone(),
            self.port.clone(),
            self.content_length.clone(),
            self.service_type.clone(),
            self.action_name.clone(),
        ]
    }

    fn finalize(&self, slots: &[Vec<u8>]) -> Vec<u8> {
        let [control_url, host, port, content_length, service_type, action_name] = slots else {
            panic!("soap Headers expects exactly 6 slots");
        };
        let mut out = Vec::new();
        out.extend_from_slice(b"POST ");
        out.extend_from_slice(control_url);
        out.extend_from_slice(b" HTTP/1.1\r\n");
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(host);
        out.push(b':');
        out.extend_from_slice(port);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"Content-Length: ");
        out.extend_from_slice(content_length);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"Content-Type: text/xml\r\n");
        out.extend_from_slice(b"SOAPAction: \"");
        out.extend_from_slice(service_type);
        out.extend_from_slice(b"#");
        out.extend_from_slice(action_name);
        out.extend_from_slice(b"\"\r\n");
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Generates the wire-format value for one argument, in decision order:
/// allowed values, then default value, then a type-directed random draw.
fn argument_value(argument: &Argument, rng: &mut dyn RngCore) -> Vec<u8> {
    if !argument.allowed_values.is_empty() {
        let idx = rng.gen_range(0..argument.allowed_values.len());
        return argument.allowed_values[idx].clone().into_bytes();
    }
    if !argument.default_value.is_empty() {
        return argument.default_value.clone().into_bytes();
    }

    match argument.data_type.as_str() {
        "ui1" => rng.gen_range(0u32..=0xff).to_string().into_bytes(),
        "ui2" => rng.gen_range(0u32..=0xffff).to_string().into_bytes(),
        "ui4" => rng.gen_range(0u64..=0xffff_ffffu64).to_string().into_bytes(),
        "i1" => rng.gen_range(-0x80i32..=0x7f).to_string().into_bytes(),
        "i2" => rng.gen_range(-0x8000i32..=0x7fff).to_string().into_bytes(),
        "i4" => rng
            .gen_range(-0x8000_0000i64..=0x7fff_ffffi64)
            .to_string()
            .into_bytes(),
        "boolean" => {
            const CHOICES: &[&[u8]] = &[b"0", b"1", b"true", b"false", b"yes", b"no"];
            CHOICES[rng.gen_range(0..CHOICES.len())].to_vec()
        }
        "string" => b"192.168.1.4".to_vec(),
        "number" | "fixed.14.14" | "float" => {
            random_real(rng).to_string().into_bytes()
        }
        "char" => b"A".to_vec(),
        "date" => random_date(rng).format("%Y-%m-%d").to_string().into_bytes(),
        "dateTime" => {
            let date = random_date(rng);
            if rng.gen_bool(0.5) {
                let time = random_time_of_day(rng);
                format!("{}T{}", date.format("%Y-%m-%d"), time).into_bytes()
            } else {
                date.format("%Y-%m-%d").to_string().into_bytes()
            }
        }
        "dateTime.tz" => {
            let date = random_date(rng);
            let time_part = if rng.gen_bool(0.5) {
                format!("T{}", random_time_of_day(rng))
            } else {
                String::new()
            };
            let tz_part = if rng.gen_bool(0.5) {
                random_tz_offset(rng)
            } else {
                String::new()
            };
            format!("{}{}{}", date.format("%Y-%m-%d"), time_part, tz_part).into_bytes()
        }
        "time" => random_datetime(rng).format("%Y-%m-%dT%H:%M:%S").to_string().into_bytes(),
        "time.tz" => {
            let offset = random_tz_offset(rng);
            let dt = random_datetime(rng);
            format!("{}{offset}", dt.format("%Y-%m-%dT%H:%M:%S")).into_bytes()
        }
        "bin.base64" => {
            let len = rng.gen_range(0..=0xff);
            base64::engine::general_purpose::STANDARD
                .encode(vec![b'A'; len])
                .into_bytes()
        }
        "bin.hex" => {
            let len = rng.gen_range(0..=0xff);
            hex::encode(vec![b'A'; len]).into_bytes()
        }
        "uri" => b"http://127.0.0.1/path".to_vec(),
        "uuid" => random_uuid(rng).to_string().into_bytes(),
        _ => {
            let len = rng.gen_range(0..=0xff);
            vec![b'A'; len]
        }
    }
}

fn random_real(rng: &mut dyn RngCore) -> f64 {
    rng.gen_range(-1.8e30..=1.8e30)
}

fn random_date(rng: &mut dyn RngCore) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid date");
    let end = NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date");
    let span_days = (end - start).num_days();
    let offset = rng.gen_range(0..=span_days);
    start + ChronoDuration::days(offset)
}

fn random_datetime(rng: &mut dyn RngCore) -> NaiveDateTime {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    let end = NaiveDate::from_ymd_opt(2030, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    let span_seconds = (end - start).num_seconds();
    let offset = rng.gen_range(0..=span_seconds);
    start + ChronoDuration::seconds(offset)
}

fn random_time_of_day(rng: &mut dyn RngCore) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        rng.gen_range(0..24),
        rng.gen_range(0..60),
        rng.gen_range(0..60)
    )
}

fn random_tz_offset(rng: &mut dyn RngCore) -> String {
    const MINUTE_CHOICES: &[u32] = &[0, 15, 30, 45];
    let hours: i32 = rng.gen_range(-12..=14);
    let minutes = MINUTE_CHOICES[rng.gen_range(0..MINUTE_CHOICES.len())];
    if hours < 0 {
        format!("-{:02}:{minutes:02}", -hours)
    } else {
        format!("+{hours:02}:{minutes:02}")
    }
}

fn random_uuid(rng: &mut dyn RngCore) -> uuid::Uuid {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_action(direction: Direction, arguments: Vec<Argument>) -> Action {
        Action {
            control_url: "/control".to_string(),
            service_type: "urn:upnp-org:serviceId:Switch".to_string(),
            action_name: "SetTarget".to_string(),
            direction,
            arguments,
        }
    }

    #[test]
    fn out_action_has_empty_body() {
        let request = Request {
            action: sample_action(Direction::Out, vec![]),
            host: b"192.168.1.1".to_vec(),
            port: b"80".to_vec(),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let body = request.body();
        let slots = body.slots(&mut rng);
        assert!(slots.is_empty());
        assert_eq!(body.finalize(&slots), Vec::<u8>::new());
    }

    #[test]
    fn in_action_wraps_one_element_per_argument() {
        let argument = Argument {
            name: "NewTargetValue".to_string(),
            data_type: "boolean".to_string(),
            default_value: String::new(),
            allowed_values: vec![],
        };
        let request = Request {
            action: sample_action(Direction::In, vec![argument]),
            host: b"192.168.1.1".to_vec(),
            port: b"80".to_vec(),
        };
        let mut rng = StdRng::seed_from_u64(2);
        let body = request.body();
        let slots = body.slots(&mut rng);
        let bytes = body.finalize(&slots);
        let text = String::from_utf8(bytes).expect("utf8 body");
        assert!(text.contains("<m:SetTarget xmlns:m=\"urn:upnp-org:serviceId:Switch\">"));
        assert!(text.contains("<NewTargetValue>"));
        assert!(text.contains("</NewTargetValue>\n"));
    }

    #[test]
    fn headers_content_length_matches_whatever_is_supplied() {
        let request = Request {
            action: sample_action(Direction::Out, vec![]),
            host: b"192.168.1.1".to_vec(),
            port: b"80".to_vec(),
        };
        let headers = request.headers(1234);
        let mut rng = StdRng::seed_from_u64(3);
        let slots = headers.slots(&mut rng);
        let bytes = headers.finalize(&slots);
        let text = String::from_utf8(bytes).expect("utf8 headers");
        assert!(text.starts_with("POST /control HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 1234\r\n"));
        assert!(text.contains("SOAPAction: \"urn:upnp-org:serviceId:Switch#SetTarget\"\r\n"));
    }

    #[test]
    fn argument_value_from_allowed_values_is_always_one_of_them() {
        let argument = Argument {
            name: "Mode".to_string(),
            data_type: "string".to_string(),
            default_value: String::new(),
            allowed_values: vec!["Eco".to_string(), "Turbo".to_string()],
        };
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            let value = argument_value(&argument, &mut rng);
            let text = String::from_utf8(value).unwrap();
            assert!(text == "Eco" || text == "Turbo");
        }
    }

    #[test]
    fn argument_value_ui1_is_within_byte_range() {
        let argument = Argument {
            name: "Level".to_string(),
            data_type: "ui1".to_string(),
            default_value: String::new(),
            allowed_values: vec![],
        };
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let value = argument_value(&argument, &mut rng);
            let n: u32 = String::from_utf8(value).unwrap().parse().unwrap();
            assert!(n <= 0xff);
        }
    }

    #[test]
    fn argument_value_unknown_type_falls_back_to_random_bytes() {
        let argument = Argument {
            name: "Weird".to_string(),
            data_type: "something-not-in-the-list".to_string(),
            default_value: String::new(),
            allowed_values: vec![],
        };
        let mut rng = StdRng::seed_from_u64(6);
        let value = argument_value(&argument, &mut rng);
        assert!(value.len() <= 0xff);
        assert!(value.iter().all(|&b| b == b'A'));
    }
}
