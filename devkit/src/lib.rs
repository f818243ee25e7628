/*!
# FleetWatch DevKit - Fixtures et amont simulé pour les tests

Bibliothèque facilitant les tests du kernel FleetWatch avec:
- Builders de payloads (push MQTT, snapshot pt-BR, historique)
- Serveur HTTP amont simulé (snapshot, historique, pannes, timeouts)
*/

pub mod payloads;
pub mod upstream;

pub use payloads::{epoch_ms, PingPayload};
pub use upstream::{FakeUpstream, Reply};
