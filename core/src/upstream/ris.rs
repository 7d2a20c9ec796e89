//! RisPort70 `selectCmDevice`: device registry query.

use super::{
    xml::{
        self,
        Element,
    },
    DeviceInventory,
};
use crate::model::{
    DeviceRecord,
    RegistrationStatus,
};

pub(super) const SERVICE: &str = "device registry";
pub(super) const PATH: &str = "/realtimeservice2/services/RISService70";
pub(super) const ACTION: &str = "selectCmDevice";

/// DirNumber line states that mean a call is up on that line.
const ACTIVE_LINE_STATES: [&str; 4] = ["Connected", "CallInProgress", "CallRemotelyHeld", "CallConnected"];

pub(super) fn select_cm_device_request(device_filter: &str, max_returned_devices: u32) -> String {
    let filter = xml::escape(device_filter);
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:soap="http://schemas.cisco.com/ast/soap">
  <soapenv:Header/>
  <soapenv:Body>
    <soap:selectCmDevice>
      <soap:StateInfo></soap:StateInfo>
      <soap:CmSelectionCriteria>
        <soap:MaxReturnedDevices>{max_returned_devices}</soap:MaxReturnedDevices>
        <soap:DeviceClass>Phone</soap:DeviceClass>
        <soap:Model>255</soap:Model>
        <soap:Status>Any</soap:Status>
        <soap:NodeName></soap:NodeName>
        <soap:SelectBy>Name</soap:SelectBy>
        <soap:SelectItems>
          <soap:item><soap:Item>{filter}</soap:Item></soap:item>
        </soap:SelectItems>
        <soap:Protocol>Any</soap:Protocol>
        <soap:DownloadStatus>Any</soap:DownloadStatus>
      </soap:CmSelectionCriteria>
    </soap:selectCmDevice>
  </soapenv:Body>
</soapenv:Envelope>"#
    )
}

/// RisPort70 wraps arrays in `item`, the older RISService uses `CmNode` / `CmDevice`.
fn entries<'a>(parent: &'a Element, legacy: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    parent.children.iter().filter(move |c| c.name == "item" || c.name == legacy)
}

pub(super) fn parse_select_cm_device(document: &Element) -> Result<DeviceInventory, String> {
    let result = document
        .find("SelectCmDeviceResult")
        .ok_or("response has no SelectCmDeviceResult")?;

    let mut inventory = DeviceInventory::default();
    let Some(cm_nodes) = result.child("CmNodes") else {
        return Ok(inventory);
    };

    for node in entries(cm_nodes, "CmNode") {
        let Some(node_name) = node.child_text("Name") else {
            continue;
        };
        trace!(node = node_name, return_code = ?node.child_text("ReturnCode"), "Registry node");
        if !inventory.nodes.iter().any(|n| n == node_name) {
            inventory.nodes.push(node_name.to_string());
        }

        let Some(cm_devices) = node.child("CmDevices") else {
            continue;
        };
        for device in entries(cm_devices, "CmDevice") {
            let record = parse_device(device);
            if record.status == RegistrationStatus::Registered {
                inventory.registered += 1;
            }
            inventory.devices.push(record);
        }
    }

    Ok(inventory)
}

fn parse_device(device: &Element) -> DeviceRecord {
    DeviceRecord {
        name: device.child_text("Name").unwrap_or("Unknown").to_string(),
        description: device.child_text("Description").map(str::to_string),
        status: device
            .child_text("Status")
            .map(RegistrationStatus::from_platform)
            .unwrap_or_default(),
        ip_address: ip_address(device),
        model: device.child_text("Model").map(str::to_string),
        active_lines: device.child_text("DirNumber").map(active_lines).unwrap_or(0),
    }
}

/// RisPort70 nests addresses as `IPAddress/item/IP`; older responses carry `IpAddress`.
fn ip_address(device: &Element) -> Option<String> {
    device
        .child("IPAddress")
        .and_then(|addresses| addresses.children.iter().find_map(|item| item.child_text("IP")))
        .or_else(|| device.child_text("IpAddress"))
        .map(str::to_string)
}

/// Counts lines in an active state, e.g. `"1000-Connected,1001-Registered"` is one.
pub(super) fn active_lines(dir_number: &str) -> u32 {
    dir_number
        .split(',')
        .filter_map(|line| line.rsplit_once('-').map(|(_, state)| state.trim()))
        .filter(|state| ACTIVE_LINE_STATES.contains(state))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body>
    <ns1:selectCmDeviceResponse xmlns:ns1="http://schemas.cisco.com/ast/soap">
      <ns1:selectCmDeviceReturn>
        <ns1:SelectCmDeviceResult>
          <ns1:TotalDevicesFound>3</ns1:TotalDevicesFound>
          <ns1:CmNodes>
            <ns1:item>
              <ns1:ReturnCode>Ok</ns1:ReturnCode>
              <ns1:Name>uat-clt-ucmsubc1.example.com</ns1:Name>
              <ns1:CmDevices>
                <ns1:item>
                  <ns1:Name>SEP001122334455</ns1:Name>
                  <ns1:DirNumber>1000-Connected,1001-Registered</ns1:DirNumber>
                  <ns1:Status>Registered</ns1:Status>
                  <ns1:Model>621</ns1:Model>
                  <ns1:Description>Front desk</ns1:Description>
                  <ns1:IPAddress>
                    <ns1:item><ns1:IP>10.0.0.5</ns1:IP><ns1:IPAddrType>ipv4</ns1:IPAddrType></ns1:item>
                  </ns1:IPAddress>
                </ns1:item>
                <ns1:item>
                  <ns1:Name>SEP66778899AABB</ns1:Name>
                  <ns1:Status>UnRegistered</ns1:Status>
                  <ns1:IPAddress/>
                </ns1:item>
              </ns1:CmDevices>
            </ns1:item>
            <ns1:item>
              <ns1:ReturnCode>NotFound</ns1:ReturnCode>
              <ns1:Name>uat-clt-ucmpubc1.example.com</ns1:Name>
              <ns1:CmDevices/>
            </ns1:item>
          </ns1:CmNodes>
        </ns1:SelectCmDeviceResult>
      </ns1:selectCmDeviceReturn>
    </ns1:selectCmDeviceResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;

    #[test]
    fn parses_devices_nodes_and_registration_count() {
        let document = xml::parse(RESPONSE).unwrap();
        let inventory = parse_select_cm_device(&document).unwrap();

        assert_eq!(
            inventory.nodes,
            vec!["uat-clt-ucmsubc1.example.com", "uat-clt-ucmpubc1.example.com"]
        );
        assert_eq!(inventory.registered, 1);
        assert_eq!(inventory.devices.len(), 2);

        let first = &inventory.devices[0];
        assert_eq!(first.name, "SEP001122334455");
        assert_eq!(first.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(first.description.as_deref(), Some("Front desk"));
        assert_eq!(first.model.as_deref(), Some("621"));
        assert_eq!(first.active_lines, 1);

        let second = &inventory.devices[1];
        assert_eq!(second.status, RegistrationStatus::Unregistered);
        assert_eq!(second.ip_address, None);
    }

    #[test]
    fn legacy_layout_is_accepted() {
        let document = xml::parse(
            "<SelectCmDeviceResult><CmNodes><CmNode><Name>pub</Name><CmDevices><CmDevice>\
             <Name>SEPAAA</Name><Status>Registered</Status><IpAddress>10.1.1.1</IpAddress>\
             </CmDevice></CmDevices></CmNode></CmNodes></SelectCmDeviceResult>",
        )
        .unwrap();
        let inventory = parse_select_cm_device(&document).unwrap();
        assert_eq!(inventory.nodes, vec!["pub"]);
        assert_eq!(inventory.devices[0].ip_address.as_deref(), Some("10.1.1.1"));
        assert_eq!(inventory.registered, 1);
    }

    #[test]
    fn missing_result_is_an_error_but_empty_result_is_not() {
        let document = xml::parse("<Envelope><Body/></Envelope>").unwrap();
        assert!(parse_select_cm_device(&document).is_err());

        let document = xml::parse("<SelectCmDeviceResult><TotalDevicesFound>0</TotalDevicesFound></SelectCmDeviceResult>").unwrap();
        let inventory = parse_select_cm_device(&document).unwrap();
        assert!(inventory.devices.is_empty());
        assert!(inventory.nodes.is_empty());
    }

    #[test]
    fn active_line_states() {
        assert_eq!(active_lines("1000-Connected"), 1);
        assert_eq!(active_lines("1000-CallInProgress, 1001-CallRemotelyHeld,1002-Registered"), 2);
        assert_eq!(active_lines("+1-919-555-0100-CallConnected"), 1);
        assert_eq!(active_lines("1000"), 0);
        assert_eq!(active_lines(""), 0);
    }

    #[test]
    fn request_escapes_the_filter() {
        let body = select_cm_device_request("SEP*&", 50);
        assert!(body.contains("<soap:Item>SEP*&amp;</soap:Item>"));
        assert!(body.contains("<soap:MaxReturnedDevices>50</soap:MaxReturnedDevices>"));
        xml::parse(&body).unwrap();
    }
}
