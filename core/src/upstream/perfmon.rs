//! PerfMon session cycle for the `CallsActive` counter of every node.

use super::{
    xml::{
        self,
        Element,
    },
    ActiveCallCounters,
};

pub(super) const SERVICE: &str = "performance counters";
pub(super) const PATH: &str = "/perfmonservice2/services/PerfmonService";

const ENVELOPE_OPEN: &str = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:soap="http://schemas.cisco.com/ast/soap">
  <soapenv:Header/>
  <soapenv:Body>"#;
const ENVELOPE_CLOSE: &str = "
  </soapenv:Body>
</soapenv:Envelope>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Operation {
    OpenSession,
    AddCounter,
    CollectSessionData,
    CloseSession,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::OpenSession => "perfmonOpenSession",
            Self::AddCounter => "perfmonAddCounter",
            Self::CollectSessionData => "perfmonCollectSessionData",
            Self::CloseSession => "perfmonCloseSession",
        }
    }

    pub(super) fn soap_action(self) -> String {
        format!("http://schemas.cisco.com/ast/soap/action/#PerfmonPort#{}", self.name())
    }
}

fn envelope(body: &str) -> String {
    format!("{ENVELOPE_OPEN}\n{body}{ENVELOPE_CLOSE}")
}

pub(super) fn counter_path(node: &str) -> String {
    format!(r"\\{node}\Cisco CallManager\CallsActive")
}

/// Hostname part of `\\host\Object\Counter`.
pub(super) fn node_from_counter(counter: &str) -> Option<&str> {
    let mut parts = counter.trim().strip_prefix(r"\\")?.split('\\');
    let host = parts.next().filter(|h| !h.is_empty())?;
    parts.next()?;
    Some(host)
}

pub(super) fn open_session_request() -> String {
    envelope("    <soap:perfmonOpenSession/>")
}

pub(super) fn add_counter_request(session: &str, nodes: &[String]) -> String {
    let counters: String = nodes
        .iter()
        .map(|node| {
            format!(
                "        <soap:Counter><soap:Name>{}</soap:Name></soap:Counter>\n",
                xml::escape(&counter_path(node))
            )
        })
        .collect();
    envelope(&format!(
        "    <soap:perfmonAddCounter>
      <soap:SessionHandle>{}</soap:SessionHandle>
      <soap:ArrayOfCounter>
{counters}      </soap:ArrayOfCounter>
    </soap:perfmonAddCounter>",
        xml::escape(session)
    ))
}

pub(super) fn collect_session_data_request(session: &str) -> String {
    envelope(&format!(
        "    <soap:perfmonCollectSessionData><soap:SessionHandle>{}</soap:SessionHandle></soap:perfmonCollectSessionData>",
        xml::escape(session)
    ))
}

pub(super) fn close_session_request(session: &str) -> String {
    envelope(&format!(
        "    <soap:perfmonCloseSession><soap:SessionHandle>{}</soap:SessionHandle></soap:perfmonCloseSession>",
        xml::escape(session)
    ))
}

pub(super) fn parse_session_handle(document: &Element) -> Result<String, String> {
    document
        .find("perfmonOpenSessionReturn")
        .map(|handle| handle.text.trim())
        .filter(|handle| !handle.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "response has no session handle".to_string())
}

/// Per-node counter values. Negative or unparsable values are skipped; a node that
/// reports the counter twice keeps the last value.
pub(super) fn parse_counters(document: &Element) -> Result<ActiveCallCounters, String> {
    document
        .find("perfmonCollectSessionDataResponse")
        .ok_or("response has no perfmonCollectSessionDataResponse")?;

    let mut entries = Vec::new();
    document.find_all("perfmonCollectSessionDataReturn", &mut entries);

    let mut counters = ActiveCallCounters::new();
    for entry in entries {
        let Some(node) = entry.child_text("Name").and_then(node_from_counter) else {
            continue;
        };
        match entry.child_text("Value").map(str::parse::<i64>) {
            Some(Ok(value)) if value >= 0 => {
                counters.insert(node.to_string(), value as u64);
            }
            other => debug!(node, ?other, "Skipping counter value"),
        }
    }

    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counter_names_round_trip_to_hostnames() {
        let path = counter_path("uat-clt-ucmpubc1.example.com");
        assert_eq!(path, r"\\uat-clt-ucmpubc1.example.com\Cisco CallManager\CallsActive");
        assert_eq!(node_from_counter(&path), Some("uat-clt-ucmpubc1.example.com"));
        assert_eq!(node_from_counter(r"\\host"), None);
        assert_eq!(node_from_counter("CallsActive"), None);
    }

    #[test]
    fn add_counter_lists_every_node_in_one_request() {
        let body = add_counter_request("ABC-123", &["pub".to_string(), "sub".to_string()]);
        assert!(body.contains(r"<soap:Name>\\pub\Cisco CallManager\CallsActive</soap:Name>"));
        assert!(body.contains(r"<soap:Name>\\sub\Cisco CallManager\CallsActive</soap:Name>"));
        assert!(body.contains("<soap:SessionHandle>ABC-123</soap:SessionHandle>"));

        let document = xml::parse(&body).unwrap();
        let mut counters = Vec::new();
        document.find_all("Counter", &mut counters);
        assert_eq!(counters.len(), 2);
    }

    #[test]
    fn parses_session_handle() {
        let document = xml::parse(
            "<Envelope><Body><perfmonOpenSessionResponse>\
             <perfmonOpenSessionReturn>{1D9C0A7E-0000}</perfmonOpenSessionReturn>\
             </perfmonOpenSessionResponse></Body></Envelope>",
        )
        .unwrap();
        assert_eq!(parse_session_handle(&document).unwrap(), "{1D9C0A7E-0000}");

        let empty = xml::parse("<Envelope><Body/></Envelope>").unwrap();
        assert!(parse_session_handle(&empty).is_err());
    }

    #[test]
    fn parses_collected_counters() {
        let document = xml::parse(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
              <soapenv:Body>
                <ns1:perfmonCollectSessionDataResponse xmlns:ns1="http://schemas.cisco.com/ast/soap">
                  <ns1:perfmonCollectSessionDataReturn>
                    <ns1:Name>\\pub\Cisco CallManager\CallsActive</ns1:Name>
                    <ns1:Value>2</ns1:Value>
                    <ns1:CStatus>1</ns1:CStatus>
                  </ns1:perfmonCollectSessionDataReturn>
                  <ns1:perfmonCollectSessionDataReturn>
                    <ns1:Name>\\sub\Cisco CallManager\CallsActive</ns1:Name>
                    <ns1:Value>1</ns1:Value>
                    <ns1:CStatus>1</ns1:CStatus>
                  </ns1:perfmonCollectSessionDataReturn>
                  <ns1:perfmonCollectSessionDataReturn>
                    <ns1:Name>\\down\Cisco CallManager\CallsActive</ns1:Name>
                    <ns1:Value>-1</ns1:Value>
                  </ns1:perfmonCollectSessionDataReturn>
                </ns1:perfmonCollectSessionDataResponse>
              </soapenv:Body>
            </soapenv:Envelope>"#,
        )
        .unwrap();

        let counters = parse_counters(&document).unwrap();
        assert_eq!(counters.len(), 2);
        assert_eq!(counters["pub"], 2);
        assert_eq!(counters["sub"], 1);
    }

    #[test]
    fn soap_actions_name_the_operation() {
        assert_eq!(
            Operation::CollectSessionData.soap_action(),
            "http://schemas.cisco.com/ast/soap/action/#PerfmonPort#perfmonCollectSessionData"
        );
    }
}
