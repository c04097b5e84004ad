//! Customer address directory.
//!
//! Loads, creates, and caches a customer's saved addresses, mapping between
//! the server representation and a locally-tagged one. A locally-created
//! address carries a [`CorrelationToken`] and no server identifier until the
//! create call confirms it; the confirmation replaces the optimistic entry in
//! place (matched by the echoed correlation token or the server id) so the
//! directory never shows duplicate rows.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use kirana_core::{
    AddressId, CityId, CorrelationToken, CountryId, CustomerId, Pincode, StateId,
};

use crate::api::{ApiClient, ApiError};

const GEO_CACHE_CAPACITY: u64 = 64;
const GEO_CACHE_TTL: Duration = Duration::from_secs(3600);

/// A saved (or optimistically pending) shipping/billing address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Stable local identifier, assigned at creation or mapping time.
    pub local_id: CorrelationToken,
    /// Server-issued identifier; `None` until the create call confirms.
    pub server_id: Option<AddressId>,
    pub recipient_name: String,
    pub recipient_contact: String,
    pub line1: String,
    pub line2: Option<String>,
    pub line3: Option<String>,
    pub landmark: Option<String>,
    pub country_id: CountryId,
    pub state_id: StateId,
    pub city_id: CityId,
    pub pincode: Pincode,
    pub is_default: bool,
}

impl Address {
    /// Whether the server has confirmed this address.
    ///
    /// Only confirmed addresses may be referenced by an order.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.server_id
            .as_ref()
            .is_some_and(AddressId::is_server_issued)
    }
}

/// Fields for creating a new address.
#[derive(Debug, Clone)]
pub struct AddressDraft {
    pub recipient_name: String,
    pub recipient_contact: String,
    pub line1: String,
    pub line2: Option<String>,
    pub line3: Option<String>,
    pub landmark: Option<String>,
    pub country_id: CountryId,
    pub state_id: StateId,
    pub city_id: CityId,
    pub pincode: Pincode,
    pub is_default: bool,
}

/// Server wire shape of an address record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressRecord {
    id: AddressId,
    recipient_name: String,
    recipient_contact: String,
    address_line1: String,
    #[serde(default)]
    address_line2: Option<String>,
    #[serde(default)]
    address_line3: Option<String>,
    #[serde(default)]
    landmark: Option<String>,
    country_id: CountryId,
    state_id: StateId,
    city_id: CityId,
    pincode: Pincode,
    #[serde(default)]
    is_default: bool,
}

impl AddressRecord {
    fn into_address(self, local_id: CorrelationToken) -> Address {
        Address {
            local_id,
            server_id: Some(self.id),
            recipient_name: self.recipient_name,
            recipient_contact: self.recipient_contact,
            line1: self.address_line1,
            line2: self.address_line2,
            line3: self.address_line3,
            landmark: self.landmark,
            country_id: self.country_id,
            state_id: self.state_id,
            city_id: self.city_id,
            pincode: self.pincode,
            is_default: self.is_default,
        }
    }
}

/// Wire shape of the create request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAddressRequest<'a> {
    /// Echoed by the server so the confirmation can be matched to the
    /// optimistic entry it confirms.
    client_reference: CorrelationToken,
    recipient_name: &'a str,
    recipient_contact: &'a str,
    address_line1: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address_line2: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address_line3: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    landmark: Option<&'a str>,
    country_id: &'a CountryId,
    state_id: &'a StateId,
    city_id: &'a CityId,
    pincode: &'a Pincode,
    is_default: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Geography reference data
// ─────────────────────────────────────────────────────────────────────────────

/// A country option for address entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
}

/// A state option for address entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: StateId,
    pub name: String,
}

/// A city option for address entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub id: CityId,
    pub name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// AddressBook
// ─────────────────────────────────────────────────────────────────────────────

/// Address directory client.
///
/// Cheaply cloneable via `Arc`; all clones share one cached list.
#[derive(Clone)]
pub struct AddressBook {
    inner: Arc<AddressBookInner>,
}

struct AddressBookInner {
    api: ApiClient,
    addresses: std::sync::RwLock<Vec<Address>>,
    geo: moka::future::Cache<String, Arc<serde_json::Value>>,
}

impl AddressBook {
    /// Create an address book over an API client.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        let geo = moka::future::Cache::builder()
            .max_capacity(GEO_CACHE_CAPACITY)
            .time_to_live(GEO_CACHE_TTL)
            .build();

        Self {
            inner: Arc::new(AddressBookInner {
                api,
                addresses: std::sync::RwLock::new(Vec::new()),
                geo,
            }),
        }
    }

    /// Snapshot of the cached address list.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.inner
            .addresses
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Find a cached address by its local identifier.
    #[must_use]
    pub fn find(&self, local_id: CorrelationToken) -> Option<Address> {
        self.addresses()
            .into_iter()
            .find(|a| a.local_id == local_id)
    }

    /// The default delivery address: the entry flagged default, else the
    /// first entry.
    #[must_use]
    pub fn default_address(&self) -> Option<Address> {
        let addresses = self.addresses();
        addresses
            .iter()
            .find(|a| a.is_default)
            .cloned()
            .or_else(|| addresses.first().cloned())
    }

    /// Fetch the customer's saved addresses, replacing the cached list.
    ///
    /// Entries already cached keep their local identifier (matched by server
    /// id) so selections held by the checkout stay stable across reloads.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self), fields(customer = %customer_id))]
    pub async fn list(&self, customer_id: &CustomerId) -> Result<Vec<Address>, ApiError> {
        let records: Vec<AddressRecord> = self
            .inner
            .api
            .get(&format!("/customer/{customer_id}/address"))
            .await?;

        let previous = self.addresses();
        let mapped: Vec<Address> = records
            .into_iter()
            .map(|record| {
                let local_id = previous
                    .iter()
                    .find(|a| a.server_id.as_ref() == Some(&record.id))
                    .map_or_else(CorrelationToken::generate, |a| a.local_id);
                record.into_address(local_id)
            })
            .collect();

        debug!(count = mapped.len(), "loaded address directory");
        self.replace(mapped.clone());
        Ok(mapped)
    }

    /// Create a new address.
    ///
    /// The draft is inserted optimistically (no server id) before the
    /// request goes out; the server confirmation then replaces the
    /// optimistic entry in place, matched by the echoed correlation token or
    /// the server id. On failure the optimistic entry is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails; the draft is always
    /// re-validated server-side.
    #[instrument(skip(self, draft), fields(customer = %customer_id))]
    pub async fn create(
        &self,
        customer_id: &CustomerId,
        draft: AddressDraft,
    ) -> Result<Address, ApiError> {
        let token = CorrelationToken::generate();

        let optimistic = Address {
            local_id: token,
            server_id: None,
            recipient_name: draft.recipient_name.clone(),
            recipient_contact: draft.recipient_contact.clone(),
            line1: draft.line1.clone(),
            line2: draft.line2.clone(),
            line3: draft.line3.clone(),
            landmark: draft.landmark.clone(),
            country_id: draft.country_id.clone(),
            state_id: draft.state_id.clone(),
            city_id: draft.city_id.clone(),
            pincode: draft.pincode.clone(),
            is_default: draft.is_default,
        };
        self.push(optimistic);

        let request = CreateAddressRequest {
            client_reference: token,
            recipient_name: &draft.recipient_name,
            recipient_contact: &draft.recipient_contact,
            address_line1: &draft.line1,
            address_line2: draft.line2.as_deref(),
            address_line3: draft.line3.as_deref(),
            landmark: draft.landmark.as_deref(),
            country_id: &draft.country_id,
            state_id: &draft.state_id,
            city_id: &draft.city_id,
            pincode: &draft.pincode,
            is_default: draft.is_default,
        };

        let confirmed: Result<AddressRecord, ApiError> = self
            .inner
            .api
            .post(
                &format!("/customer/{customer_id}/address"),
                crate::api::transport::json_body(&request),
            )
            .await;

        match confirmed {
            Ok(record) => {
                let address = record.into_address(token);
                self.reconcile(token, address.clone());
                Ok(address)
            }
            Err(err) => {
                self.remove(token);
                Err(err)
            }
        }
    }

    /// Geography options for the country selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails and no cached copy exists.
    pub async fn countries(&self) -> Result<Vec<Country>, ApiError> {
        self.geo_lookup("/master/countries").await
    }

    /// Geography options for the state selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails and no cached copy exists.
    pub async fn states(&self, country_id: &CountryId) -> Result<Vec<State>, ApiError> {
        self.geo_lookup(&format!("/master/states?countryId={country_id}"))
            .await
    }

    /// Geography options for the city selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails and no cached copy exists.
    pub async fn cities(&self, state_id: &StateId) -> Result<Vec<City>, ApiError> {
        self.geo_lookup(&format!("/master/cities?stateId={state_id}"))
            .await
    }

    /// Fetch reference data through the geo cache.
    async fn geo_lookup<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, ApiError> {
        if let Some(cached) = self.inner.geo.get(path).await {
            debug!(path, "geo cache hit");
            return decode_geo(&cached);
        }

        let value: serde_json::Value = self.inner.api.get(path).await?;
        let value = Arc::new(value);
        let parsed = decode_geo(&value)?;
        self.inner.geo.insert(path.to_owned(), value).await;
        Ok(parsed)
    }

    fn replace(&self, addresses: Vec<Address>) {
        if let Ok(mut guard) = self.inner.addresses.write() {
            *guard = addresses;
        }
    }

    fn push(&self, address: Address) {
        if let Ok(mut guard) = self.inner.addresses.write() {
            guard.push(address);
        }
    }

    fn remove(&self, local_id: CorrelationToken) {
        if let Ok(mut guard) = self.inner.addresses.write() {
            guard.retain(|a| a.local_id != local_id);
        }
    }

    /// Replace the entry matching the correlation token or server id in
    /// place; append only when no match exists.
    fn reconcile(&self, token: CorrelationToken, confirmed: Address) {
        if let Ok(mut guard) = self.inner.addresses.write() {
            let position = guard.iter().position(|a| {
                a.local_id == token
                    || (a.server_id.is_some() && a.server_id == confirmed.server_id)
            });
            match position {
                Some(index) => {
                    if let Some(slot) = guard.get_mut(index) {
                        *slot = confirmed;
                    }
                }
                None => guard.push(confirmed),
            }
        }
    }
}

fn decode_geo<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Result<Vec<T>, ApiError> {
    serde_json::from_value(value.clone()).map_err(|source| ApiError::Parse {
        source,
        body: value.to_string().chars().take(200).collect(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
    use crate::session::{MemoryCredentialStore, Session, SessionStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedTransport {
        script: Mutex<Vec<(String, HttpResponse)>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<(&str, u16, String)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(path, status, body)| {
                            (path.to_owned(), HttpResponse { status, body })
                        })
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_body(&self) -> Option<serde_json::Value> {
            self.requests.lock().unwrap().last().and_then(|r| r.body.clone())
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            let position = script
                .iter()
                .position(|(path, _)| *path == request.path)
                .unwrap_or_else(|| panic!("unscripted request: {}", request.path));
            Ok(script.remove(position).1)
        }
    }

    async fn book(transport: Arc<ScriptedTransport>) -> AddressBook {
        let session = SessionStore::new(Arc::new(MemoryCredentialStore::new()));
        session
            .sign_in(Session {
                customer_id: CustomerId::new("64a51cf2e9b4d20019f3a8c1"),
                access_token: "token".to_owned(),
                issued_at: chrono::Utc::now().timestamp(),
                expires_in: None,
            })
            .await
            .unwrap();
        AddressBook::new(ApiClient::new(transport, session))
    }

    fn record_json(id: &str, is_default: bool) -> String {
        serde_json::json!({
            "id": id,
            "recipientName": "Asha Rao",
            "recipientContact": "9876543210",
            "addressLine1": "14 MG Road",
            "countryId": "64a51cf2e9b4d20019f3a001",
            "stateId": "64a51cf2e9b4d20019f3a002",
            "cityId": "64a51cf2e9b4d20019f3a003",
            "pincode": "560034",
            "isDefault": is_default,
        })
        .to_string()
    }

    fn draft() -> AddressDraft {
        AddressDraft {
            recipient_name: "Asha Rao".to_owned(),
            recipient_contact: "9876543210".to_owned(),
            line1: "14 MG Road".to_owned(),
            line2: None,
            line3: None,
            landmark: None,
            country_id: CountryId::new("64a51cf2e9b4d20019f3a001"),
            state_id: StateId::new("64a51cf2e9b4d20019f3a002"),
            city_id: CityId::new("64a51cf2e9b4d20019f3a003"),
            pincode: Pincode::parse("560034").unwrap(),
            is_default: false,
        }
    }

    #[tokio::test]
    async fn list_maps_records_and_assigns_local_ids() {
        let body = format!(
            "[{},{}]",
            record_json("64a51cf2e9b4d20019f3a8d1", true),
            record_json("64a51cf2e9b4d20019f3a8d2", false)
        );
        let transport = ScriptedTransport::new(vec![(
            "/customer/64a51cf2e9b4d20019f3a8c1/address",
            200,
            body,
        )]);
        let book = book(transport).await;

        let customer = CustomerId::new("64a51cf2e9b4d20019f3a8c1");
        let addresses = book.list(&customer).await.unwrap();

        assert_eq!(addresses.len(), 2);
        assert!(addresses[0].is_saved());
        assert_ne!(addresses[0].local_id, addresses[1].local_id);
    }

    #[tokio::test]
    async fn list_twice_keeps_local_ids_stable() {
        let body = format!("[{}]", record_json("64a51cf2e9b4d20019f3a8d1", true));
        let transport = ScriptedTransport::new(vec![
            (
                "/customer/64a51cf2e9b4d20019f3a8c1/address",
                200,
                body.clone(),
            ),
            ("/customer/64a51cf2e9b4d20019f3a8c1/address", 200, body),
        ]);
        let book = book(transport).await;
        let customer = CustomerId::new("64a51cf2e9b4d20019f3a8c1");

        let first = book.list(&customer).await.unwrap();
        let second = book.list(&customer).await.unwrap();
        assert_eq!(first[0].local_id, second[0].local_id);
    }

    #[tokio::test]
    async fn default_address_prefers_flag_then_first() {
        let body = format!(
            "[{},{}]",
            record_json("64a51cf2e9b4d20019f3a8d1", false),
            record_json("64a51cf2e9b4d20019f3a8d2", true)
        );
        let transport = ScriptedTransport::new(vec![(
            "/customer/64a51cf2e9b4d20019f3a8c1/address",
            200,
            body,
        )]);
        let book = book(transport).await;
        let customer = CustomerId::new("64a51cf2e9b4d20019f3a8c1");
        book.list(&customer).await.unwrap();

        let default = book.default_address().unwrap();
        assert_eq!(
            default.server_id,
            Some(AddressId::new("64a51cf2e9b4d20019f3a8d2"))
        );
    }

    #[tokio::test]
    async fn create_replaces_optimistic_entry_in_place() {
        let transport = ScriptedTransport::new(vec![(
            "/customer/64a51cf2e9b4d20019f3a8c1/address",
            200,
            record_json("64a51cf2e9b4d20019f3a8d9", false),
        )]);
        let book = book(transport.clone()).await;
        let customer = CustomerId::new("64a51cf2e9b4d20019f3a8c1");

        let created = book.create(&customer, draft()).await.unwrap();

        // One row, confirmed in place; no duplicate from the optimistic insert.
        let addresses = book.addresses();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].local_id, created.local_id);
        assert!(addresses[0].is_saved());

        // The correlation token went out on the wire.
        let body = transport.last_body().unwrap();
        assert!(body.get("clientReference").is_some());
    }

    #[tokio::test]
    async fn create_failure_removes_optimistic_entry() {
        let transport = ScriptedTransport::new(vec![(
            "/customer/64a51cf2e9b4d20019f3a8c1/address",
            422,
            r#"{"message":"invalid pincode"}"#.to_owned(),
        )]);
        let book = book(transport).await;
        let customer = CustomerId::new("64a51cf2e9b4d20019f3a8c1");

        let result = book.create(&customer, draft()).await;
        assert!(result.is_err());
        assert!(book.addresses().is_empty());
    }

    #[tokio::test]
    async fn geo_lookups_are_cached() {
        let countries = serde_json::json!([
            {"id": "64a51cf2e9b4d20019f3a001", "name": "India"}
        ])
        .to_string();
        let transport =
            ScriptedTransport::new(vec![("/master/countries", 200, countries)]);
        let book = book(transport.clone()).await;

        let first = book.countries().await.unwrap();
        let second = book.countries().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].name, "India");
        // Second call served from cache.
        assert_eq!(transport.request_count(), 1);
    }
}
