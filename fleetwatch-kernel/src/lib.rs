/**
 * FLEETWATCH KERNEL - Moteur de télémétrie de flotte
 *
 * RÔLE : Fusionne deux flux de positions (snapshot HTTP périodique + push
 * MQTT) en un historique borné par entité, et en dérive liveness, risque
 * stationnaire, agrégats par unité, trajets et heat points.
 *
 * ARCHITECTURE : cœur pur (normalizer, store, liveness, risk, units, route,
 * heat) + hôte async (poller, mqtt, acteur moteur, API REST).
 */

pub mod config;
pub mod engine;
pub mod events;
pub mod fetch;
pub mod geo;
pub mod health;
pub mod heat;
pub mod http;
pub mod liveness;
pub mod models;
pub mod mqtt;
pub mod normalizer;
pub mod poller;
pub mod prefs;
pub mod risk;
pub mod route;
pub mod route_fetch;
pub mod store;
pub mod units;
