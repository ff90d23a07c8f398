//! CONNECT payload: the broker's connection parameters in Thrift compact form.

use super::packet::ConnectPacket;
use super::thrift::ThriftWriter;
use crate::connection_data::ConnectionData;
use crate::constants::{
    CLIENT_CAPABILITIES, CLIENT_STACK, CLIENT_TYPE, CONNECT_APP_ID, ENDPOINT_CAPABILITIES,
    NETWORK_SUBTYPE, NETWORK_TYPE, PUBLISH_FORMAT,
};
use crate::protocol::packet::Topic;

/// Values that vary per connection; everything else is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// MQTT client identifier.
    pub client_id: String,
    /// Broker-side user id, zero before the first CONNACK.
    pub user_id: i64,
    /// User agent string.
    pub user_agent: String,
    /// Broker-issued device id.
    pub device_id: String,
    /// Broker-issued device secret.
    pub device_secret: String,
    /// Broker password.
    pub password: String,
    /// Session id for this CONNECT.
    pub session_id: i64,
}

impl ConnectParams {
    /// Collect the parameters from the persisted record.
    #[must_use]
    pub fn from_connection_data(data: &ConnectionData) -> Self {
        let auth = data.broker_auth();
        Self {
            client_id: data.client_id.clone(),
            user_id: auth.user_id,
            user_agent: data.user_agent.clone(),
            device_id: auth.device_id,
            device_secret: auth.device_secret,
            password: auth.password,
            session_id: data.mqtt_session_id,
        }
    }

    /// Serialize to Thrift compact. Empty strings are left out.
    #[must_use]
    pub fn to_thrift(&self) -> Vec<u8> {
        let subscribe: Vec<i32> = [Topic::Message, Topic::RegistrationResponse]
            .iter()
            .filter_map(Topic::code)
            .map(i32::from)
            .collect();

        let mut w = ThriftWriter::new();
        string_field(&mut w, 1, &self.client_id);

        w.begin_struct(4);
        w.write_i64(1, self.user_id);
        string_field(&mut w, 2, &self.user_agent);
        w.write_i64(3, CLIENT_CAPABILITIES)
            .write_i64(4, ENDPOINT_CAPABILITIES)
            .write_i32(5, PUBLISH_FORMAT)
            .write_bool(6, true)
            .write_bool(7, false);
        string_field(&mut w, 8, &self.device_id);
        w.write_bool(9, false)
            .write_i32(10, NETWORK_TYPE)
            .write_i32(11, NETWORK_SUBTYPE)
            .write_i64(12, self.session_id)
            .write_i32_list(14, &subscribe)
            .write_string(15, CLIENT_TYPE)
            .write_i64(16, CONNECT_APP_ID);
        string_field(&mut w, 20, &self.device_secret);
        w.write_byte(21, CLIENT_STACK);
        w.end_struct();

        string_field(&mut w, 5, &self.password);
        w.finish()
    }

    /// Build the CONNECT packet carrying these parameters.
    #[must_use]
    pub fn into_packet(self) -> ConnectPacket {
        ConnectPacket::with_payload(self.to_thrift())
    }
}

fn string_field(w: &mut ThriftWriter, id: i16, value: &str) {
    if !value.is_empty() {
        w.write_string(id, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectParams {
        ConnectParams {
            client_id: "0123456789abcdef0123".into(),
            user_id: 0,
            user_agent: "ua".into(),
            device_id: String::new(),
            device_secret: String::new(),
            password: String::new(),
            session_id: 0,
        }
    }

    #[test]
    fn test_payload_starts_with_client_id() {
        let bytes = params().to_thrift();
        assert_eq!(bytes[0], 0x18);
        assert_eq!(bytes[1], 20);
        assert_eq!(&bytes[2..22], b"0123456789abcdef0123");
        // client info struct follows at field 4 (delta 3)
        assert_eq!(bytes[22], 0x3C);
    }

    #[test]
    fn test_empty_strings_are_omitted() {
        let anonymous = params().to_thrift();
        let mut with_auth = params();
        with_auth.password = "pw".into();
        with_auth.device_secret = "secret".into();
        let authed = with_auth.to_thrift();
        assert!(authed.len() > anonymous.len());
        assert!(authed.windows(6).any(|w| w == b"secret"));
        assert!(!anonymous.windows(2).any(|w| w == b"pw"));
    }

    #[test]
    fn test_payload_carries_fixed_values() {
        let bytes = params().to_thrift();
        assert!(bytes.windows(CLIENT_TYPE.len()).any(|w| w == CLIENT_TYPE.as_bytes()));
        // list<i32> header for two elements followed by zigzag(76), zigzag(80)
        assert!(bytes.windows(5).any(|w| w == [0x25, 152, 1, 160, 1]));
        assert_eq!(*bytes.last().expect("stop"), 0x00);
    }
}
