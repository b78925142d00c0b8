// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! LwM2M client state machine.
//!
//! The client does no I/O. The caller feeds received datagrams through
//! [`Lwm2mClient::handle_datagram`], calls [`Lwm2mClient::process`] whenever the returned wait
//! time has elapsed (or an application event changed the object tree) and transmits everything
//! left in the [`Outbox`].
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::net::SocketAddr;

use coap_lite::{RequestType, ResponseType};

use crate::coap_mapping::{CoapDecoder, CoapEncoder, CoapMessage, Reply, Request, Response};
use crate::encoding::{self, link_format, text, tlv};
use crate::error::Lwm2mError;
use crate::object::{InstanceId, ObjectId, ObjectStore, Path, ResourceDefinition, ResourceValue, Value};
use crate::objects::{device, digital_input, security, server};
use crate::observe::{Attributes, ObservationRegistry};
use crate::options::ClientOptions;
use crate::transport::{Outbox, RequestKind, Transport};

pub const BOOTSTRAP_TIMEOUT_MS: u64 = 30_000;
pub const REGISTRATION_BACKOFF_MIN_MS: u64 = 5_000;
pub const REGISTRATION_BACKOFF_MAX_MS: u64 = 300_000;
/// Upper bound for the wait time returned by `process`.
pub const MAX_WAIT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    BootstrapHoldOff { until: u64 },
    BootstrapRequesting,
    BootstrapInProgress { deadline: u64 },
    RegisterPending { at: u64 },
    Registering,
    Registered { update_at: u64 },
    Updating,
    Deregistering,
    Disabled { until: u64 },
    Deregistered,
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Bootstrapped,
    Registered,
    Deregistered,
    Reboot,
    FactoryReset,
    /// Execute on a resource the client does not handle itself.
    Execute { path: Path, arguments: Vec<u8> },
}

struct ActiveServer {
    addr: SocketAddr,
    short_server_id: Option<u16>,
    lifetime_s: u32,
    location: Vec<String>,
    default_attributes: Attributes,
}

pub struct Lwm2mClient {
    options: ClientOptions,
    store: ObjectStore,
    observations: ObservationRegistry,
    transport: Transport,
    state: ClientState,
    server: Option<ActiveServer>,
    bootstrap_peer: Option<SocketAddr>,
    backoff_ms: u64,
    tree_changed: bool,
    update_requested: bool,
    disable_for_s: Option<u32>,
    events: VecDeque<ClientEvent>,
}

impl Lwm2mClient {
    pub fn new(options: ClientOptions) -> Self {
        let transport = Transport::new(options.seed);
        Lwm2mClient {
            options,
            store: ObjectStore::new(),
            observations: ObservationRegistry::new(),
            transport,
            state: ClientState::Idle,
            server: None,
            bootstrap_peer: None,
            backoff_ms: REGISTRATION_BACKOFF_MIN_MS,
            tree_changed: false,
            update_requested: false,
            disable_for_s: None,
            events: VecDeque::new(),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ObjectStore {
        &mut self.store
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Location assigned by the server on registration, e.g. `/rd/5a3f`.
    pub fn registration_location(&self) -> Option<String> {
        let server = self.server.as_ref()?;
        if server.location.is_empty() {
            return None;
        }
        let mut location = String::new();
        for segment in server.location.iter() {
            location.push('/');
            location.push_str(segment);
        }
        Some(location)
    }

    /// Marks a value as changed by the application so that observers get notified.
    pub fn notify_changed(&mut self, path: Path) {
        self.observations.mark_changed(path);
    }

    /// Signals that instances were created or deleted locally; the next Update carries the new object list.
    pub fn object_tree_changed(&mut self) {
        self.tree_changed = true;
    }

    /// Runs timers and pending state transitions. Returns the time in ms until the next call is due.
    pub fn process(&mut self, now: u64, outbox: &mut Outbox) -> u64 {
        if let Some(kind) = self.transport.poll(now, outbox) {
            log::warn!("{:?} request timed out", kind);
            self.request_failed(kind, now);
        }

        // A transition may make the next step due immediately (zero hold-off, bootstrap finished...).
        for _ in 0..4 {
            if !self.step(now, outbox) {
                break;
            }
        }

        if matches!(self.state, ClientState::Registered { .. } | ClientState::Updating) {
            self.send_notifications(now, outbox);
        }

        self.next_deadline(now).saturating_sub(now).min(MAX_WAIT_MS)
    }

    fn step(&mut self, now: u64, outbox: &mut Outbox) -> bool {
        let before = self.state;
        match before {
            ClientState::Idle => self.start(now),
            ClientState::BootstrapHoldOff { until } if now >= until => self.send_bootstrap_request(now, outbox),
            ClientState::BootstrapInProgress { deadline } if now >= deadline => {
                log::warn!("Bootstrap did not finish in time");
                self.bootstrap_failed(now);
            }
            ClientState::RegisterPending { at } if now >= at => self.send_register(now, outbox),
            ClientState::Registered { .. } if self.disable_for_s.is_some() => self.send_deregister(now, outbox),
            ClientState::Registered { update_at } if now >= update_at || self.tree_changed || self.update_requested => self.send_update(now, outbox),
            ClientState::Disabled { until } if now >= until => {
                log::info!("Server disable period over");
                self.state = ClientState::RegisterPending { at: now };
            }
            _ => {}
        }
        before != self.state
    }

    fn next_deadline(&self, now: u64) -> u64 {
        let mut deadline = now + MAX_WAIT_MS;
        let state_deadline = match self.state {
            ClientState::Idle => Some(now),
            ClientState::BootstrapHoldOff { until } | ClientState::Disabled { until } => Some(until),
            ClientState::BootstrapInProgress { deadline } => Some(deadline),
            ClientState::RegisterPending { at } => Some(at),
            ClientState::Registered { .. } if self.tree_changed || self.update_requested || self.disable_for_s.is_some() => Some(now),
            ClientState::Registered { update_at } => Some(update_at),
            _ => None,
        };
        for candidate in [state_deadline, self.transport.next_deadline()].into_iter().flatten() {
            deadline = deadline.min(candidate);
        }
        if matches!(self.state, ClientState::Registered { .. } | ClientState::Updating) {
            if let Some(observation_deadline) = self.observations.next_deadline(self.default_attributes()) {
                deadline = deadline.min(observation_deadline);
            }
        }
        deadline
    }

    /// Starts the bootstrap and registration sequence again from the current security object.
    fn start(&mut self, now: u64) {
        if self.registration_account().is_some() {
            self.state = ClientState::RegisterPending { at: now };
            return;
        }
        match self.bootstrap_account() {
            Some(account) => {
                log::info!("Bootstrapping from {} after {} s hold-off", account.uri, account.hold_off_s);
                self.state = ClientState::BootstrapHoldOff {
                    until: now + account.hold_off_s as u64 * 1000,
                };
            }
            None => {
                log::error!("Failed to initialise the LWM2M client: no server or bootstrap account configured");
                self.state = ClientState::Deregistered;
            }
        }
    }

    fn registration_account(&self) -> Option<security::SecurityAccount> {
        security::accounts(&self.store).find(|a| !a.bootstrap && crate::uri::parse_server_uri(&a.uri).is_ok())
    }

    fn bootstrap_account(&self) -> Option<security::SecurityAccount> {
        security::accounts(&self.store).find(|a| a.bootstrap)
    }

    fn backoff(&mut self) -> u64 {
        let delay = self.backoff_ms;
        self.backoff_ms = (self.backoff_ms * 2).min(REGISTRATION_BACKOFF_MAX_MS);
        delay
    }

    fn send_bootstrap_request(&mut self, now: u64, outbox: &mut Outbox) {
        let account = match self.bootstrap_account() {
            Some(account) => account,
            None => {
                log::error!("Bootstrap account vanished");
                self.state = ClientState::Deregistered;
                return;
            }
        };
        let uri = match crate::uri::parse_server_uri(&account.uri) {
            Ok(uri) => uri,
            Err(err) => {
                log::error!("Bootstrap server URI {} unusable: {}", account.uri, err);
                self.bootstrap_failed(now);
                return;
            }
        };
        let message_id = self.transport.next_message_id();
        let token = self.transport.next_token();
        match CoapEncoder::encode_bootstrap_request(&self.options.endpoint_name, message_id, &token) {
            Ok(data) => {
                log::info!("Sending Bootstrap-Request to {}", uri.addr);
                self.transport.send_request(RequestKind::Bootstrap, uri.addr, message_id, token, data, now, outbox);
                self.bootstrap_peer = Some(uri.addr);
                self.state = ClientState::BootstrapRequesting;
            }
            Err(err) => {
                log::error!("{}", err);
                self.bootstrap_failed(now);
            }
        }
    }

    fn bootstrap_failed(&mut self, now: u64) {
        let delay = self.backoff();
        log::warn!("Bootstrap failed, retrying in {} ms", delay);
        self.state = ClientState::BootstrapHoldOff { until: now + delay };
    }

    fn finish_bootstrap(&mut self) -> Result<(), Lwm2mError> {
        if self.registration_account().is_none() {
            log::warn!("Bootstrap-Finish without a usable server account");
            return Err(Lwm2mError::NotAcceptable);
        }
        log::info!("Bootstrap finished");
        self.backoff_ms = REGISTRATION_BACKOFF_MIN_MS;
        self.events.push_back(ClientEvent::Bootstrapped);
        Ok(())
    }

    fn send_register(&mut self, now: u64, outbox: &mut Outbox) {
        let account = match self.registration_account() {
            Some(account) => account,
            None => {
                log::warn!("No server account, falling back to bootstrap");
                self.state = ClientState::Idle;
                self.start(now);
                return;
            }
        };
        if account.mode != security::SECURITY_MODE_NO_SEC {
            log::error!("Security mode {} of {} is not supported", account.mode, account.uri);
            self.registration_failed(now);
            return;
        }
        let addr = match crate::uri::parse_server_uri(&account.uri) {
            Ok(uri) => uri.addr,
            Err(err) => {
                log::error!("Server URI {} unusable: {}", account.uri, err);
                self.registration_failed(now);
                return;
            }
        };

        let settings = account.short_server_id.and_then(|id| server::find_by_short_id(&self.store, id));
        let lifetime_s = settings.as_ref().map(|s| s.lifetime_s).unwrap_or_else(|| self.default_lifetime_s());
        if let Some(binding) = settings.as_ref().map(|s| s.binding.as_str()).filter(|b| *b != "U") {
            log::warn!("Binding {} not supported, registering with U", binding);
        }
        let default_attributes = Attributes {
            pmin: settings.as_ref().and_then(|s| s.default_pmin),
            pmax: settings.as_ref().and_then(|s| s.default_pmax),
        };

        let links = link_format::registration_payload(&self.store);
        let message_id = self.transport.next_message_id();
        let token = self.transport.next_token();
        match CoapEncoder::encode_register(&self.options.endpoint_name, lifetime_s, "U", &links, message_id, &token) {
            Ok(data) => {
                log::info!("Registering with {} as {} (lifetime {} s)", addr, self.options.endpoint_name, lifetime_s);
                log::debug!("Objects: {}", links);
                self.observations.cancel_all();
                self.transport.send_request(RequestKind::Register, addr, message_id, token, data, now, outbox);
                self.server = Some(ActiveServer {
                    addr,
                    short_server_id: account.short_server_id,
                    lifetime_s,
                    location: Vec::new(),
                    default_attributes,
                });
                self.tree_changed = false;
                self.update_requested = false;
                self.state = ClientState::Registering;
            }
            Err(err) => {
                log::error!("{}", err);
                self.registration_failed(now);
            }
        }
    }

    fn registration_failed(&mut self, now: u64) {
        let delay = self.backoff();
        log::warn!("Registration failed, retrying in {} ms", delay);
        self.state = ClientState::RegisterPending { at: now + delay };
    }

    /// Lifetime from the options. Zero would make every instant an update deadline.
    fn default_lifetime_s(&self) -> u32 {
        match self.options.lifetime_s {
            0 => server::DEFAULT_LIFETIME_S,
            lifetime => lifetime,
        }
    }

    fn update_at(&self, now: u64) -> u64 {
        let lifetime_ms = self.server.as_ref().map(|s| s.lifetime_s).unwrap_or_else(|| self.default_lifetime_s()) as u64 * 1000;
        now + lifetime_ms * 9 / 10
    }

    fn send_update(&mut self, now: u64, outbox: &mut Outbox) {
        let settings = self
            .server
            .as_ref()
            .and_then(|s| s.short_server_id)
            .and_then(|id| server::find_by_short_id(&self.store, id));
        let server = match self.server.as_mut() {
            Some(server) => server,
            None => {
                self.state = ClientState::RegisterPending { at: now };
                return;
            }
        };

        let mut lifetime = None;
        if let Some(settings) = settings {
            if settings.lifetime_s != server.lifetime_s {
                server.lifetime_s = settings.lifetime_s;
                lifetime = Some(settings.lifetime_s);
            }
            server.default_attributes = Attributes {
                pmin: settings.default_pmin,
                pmax: settings.default_pmax,
            };
        }
        let links = match self.tree_changed {
            true => Some(link_format::registration_payload(&self.store)),
            false => None,
        };

        let message_id = self.transport.next_message_id();
        let token = self.transport.next_token();
        match CoapEncoder::encode_update(&server.location, lifetime, links.as_deref(), message_id, &token) {
            Ok(data) => {
                log::info!("Sending registration update to {}", server.addr);
                self.transport.send_request(RequestKind::Update, server.addr, message_id, token, data, now, outbox);
                self.tree_changed = false;
                self.update_requested = false;
                self.state = ClientState::Updating;
            }
            Err(err) => {
                log::error!("{}", err);
                self.state = ClientState::RegisterPending { at: now };
            }
        }
    }

    fn send_deregister(&mut self, now: u64, outbox: &mut Outbox) {
        let server = match self.server.as_ref() {
            Some(server) => server,
            None => return,
        };
        let message_id = self.transport.next_message_id();
        let token = self.transport.next_token();
        match CoapEncoder::encode_deregister(&server.location, message_id, &token) {
            Ok(data) => {
                log::info!("De-registering from {}", server.addr);
                self.transport.send_request(RequestKind::Deregister, server.addr, message_id, token, data, now, outbox);
                self.state = ClientState::Deregistering;
            }
            Err(err) => log::error!("{}", err),
        }
    }

    /// De-registers from the current server. The client stays idle afterwards.
    pub fn deregister(&mut self, now: u64, outbox: &mut Outbox) {
        match self.state {
            ClientState::Registered { .. } | ClientState::Updating => self.send_deregister(now, outbox),
            _ => {
                self.transport.cancel();
                self.state = ClientState::Deregistered;
            }
        }
    }

    fn deregistered(&mut self, now: u64) {
        self.observations.cancel_all();
        self.events.push_back(ClientEvent::Deregistered);
        self.state = match self.disable_for_s.take() {
            Some(timeout_s) => {
                log::info!("Server disabled for {} s", timeout_s);
                ClientState::Disabled {
                    until: now + timeout_s as u64 * 1000,
                }
            }
            None => ClientState::Deregistered,
        };
    }

    fn request_failed(&mut self, kind: RequestKind, now: u64) {
        match kind {
            RequestKind::Bootstrap => self.bootstrap_failed(now),
            RequestKind::Register => self.registration_failed(now),
            RequestKind::Update => self.state = ClientState::RegisterPending { at: now },
            RequestKind::Deregister => self.deregistered(now),
        }
    }

    /// Feeds one received UDP datagram into the client.
    pub fn handle_datagram(&mut self, now: u64, from: SocketAddr, data: &[u8], outbox: &mut Outbox) {
        let message = match CoapDecoder::decode(data) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("Dropping datagram from {}: {}", from, err);
                return;
            }
        };
        match message {
            CoapMessage::Request(request) => self.handle_request(now, from, request, outbox),
            CoapMessage::Response(response) => {
                if response.message_type == coap_lite::MessageType::Confirmable {
                    if let Ok(ack) = CoapEncoder::encode_empty_ack(response.message_id) {
                        outbox.push(from, ack);
                    }
                }
                self.handle_response(now, from, response);
            }
            CoapMessage::EmptyAck(message_id) => {
                if self.transport.acknowledge(from, message_id, now) {
                    log::debug!("Request {} acknowledged, waiting for separate response", message_id);
                }
            }
            CoapMessage::Reset(message_id) => {
                if let Some(kind) = self.transport.reject(from, message_id) {
                    log::warn!("{:?} request reset by {}", kind, from);
                    self.request_failed(kind, now);
                } else if self.observations.cancel_message(from, message_id) {
                    log::info!("Observation cancelled by reset from {}", from);
                }
            }
            CoapMessage::Ping(message_id) => {
                if let Ok(reset) = CoapEncoder::encode_reset(message_id) {
                    outbox.push(from, reset);
                }
            }
        }
    }

    fn handle_response(&mut self, now: u64, from: SocketAddr, response: Response) {
        let kind = match self.transport.complete(from, &response.token) {
            Some(kind) => kind,
            None => {
                log::debug!("Ignoring unexpected response {:?} from {}", response.code, from);
                return;
            }
        };
        match (kind, response.code) {
            (RequestKind::Bootstrap, ResponseType::Changed) => {
                log::info!("Bootstrap-Request accepted");
                // Bootstrap-Finish may have arrived before the response.
                if self.state == ClientState::BootstrapRequesting {
                    self.state = ClientState::BootstrapInProgress {
                        deadline: now + BOOTSTRAP_TIMEOUT_MS,
                    };
                }
            }
            (RequestKind::Register, ResponseType::Created) => {
                let update_at = self.update_at(now);
                if let Some(server) = self.server.as_mut() {
                    server.location = response.location;
                }
                self.backoff_ms = REGISTRATION_BACKOFF_MIN_MS;
                self.state = ClientState::Registered { update_at };
                self.events.push_back(ClientEvent::Registered);
                log::info!("Registered at {}", self.registration_location().unwrap_or_default());
            }
            (RequestKind::Update, ResponseType::Changed) => {
                self.state = ClientState::Registered {
                    update_at: self.update_at(now),
                };
            }
            (RequestKind::Update, ResponseType::NotFound) => {
                log::warn!("Registration unknown to the server, registering again");
                self.state = ClientState::RegisterPending { at: now };
            }
            (RequestKind::Deregister, _) => self.deregistered(now),
            (kind, code) => {
                log::warn!("{:?} request failed with {:?}", kind, code);
                self.request_failed(kind, now);
            }
        }
    }

    fn handle_request(&mut self, now: u64, from: SocketAddr, request: Request, outbox: &mut Outbox) {
        if request.confirmable {
            if let Some(cached) = self.transport.cached_response(from, request.message_id) {
                log::debug!("Duplicate request {} from {}, resending response", request.message_id, from);
                outbox.push(from, cached.to_vec());
                return;
            }
        }

        let bootstrapping = matches!(self.state, ClientState::BootstrapRequesting | ClientState::BootstrapInProgress { .. });
        let registered = matches!(self.state, ClientState::Registered { .. } | ClientState::Updating);
        let reply = if bootstrapping && self.bootstrap_peer == Some(from) {
            self.bootstrap_request(now, &request)
        } else if registered && self.server.as_ref().map(|s| s.addr) == Some(from) {
            self.management_request(now, from, &request)
        } else {
            log::warn!("Rejecting {:?} request from unknown peer {}", request.method, from);
            Reply::new(ResponseType::Unauthorized)
        };

        let message_id = match request.confirmable {
            true => request.message_id,
            false => self.transport.next_message_id(),
        };
        match CoapEncoder::encode_response(&request, &reply, message_id) {
            Ok(data) => {
                if request.confirmable {
                    self.transport.cache_response(from, request.message_id, data.clone());
                }
                outbox.push(from, data);
            }
            Err(err) => log::error!("{}", err),
        }
    }

    fn bootstrap_request(&mut self, now: u64, request: &Request) -> Reply {
        if request.method == RequestType::Post && request.path == ["bs"] {
            return match self.finish_bootstrap() {
                Ok(()) => {
                    self.transport.cancel();
                    self.state = ClientState::RegisterPending { at: now };
                    Reply::new(ResponseType::Changed)
                }
                Err(err) => Reply::new(err.response_type()),
            };
        }
        let path = match Path::parse(request.path_segments()) {
            Ok(path) => path,
            Err(err) => return Reply::new(err.response_type()),
        };
        let result = match request.method {
            RequestType::Put => self.bootstrap_write(path, request.content_format, &request.payload).map(|_| ResponseType::Changed),
            RequestType::Delete => self.bootstrap_delete(path).map(|_| ResponseType::Deleted),
            _ => Err(Lwm2mError::MethodNotAllowed),
        };
        match result {
            Ok(code) => {
                log::debug!("Bootstrap {:?} {} ok", request.method, path);
                Reply::new(code)
            }
            Err(err) => {
                log::warn!("Bootstrap {:?} {} failed: {}", request.method, path, err);
                Reply::new(err.response_type())
            }
        }
    }

    fn bootstrap_write(&mut self, path: Path, content_format: Option<u16>, payload: &[u8]) -> Result<(), Lwm2mError> {
        match path {
            Path::Object(object) => {
                self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
                if !content_format.map(encoding::is_tlv).unwrap_or(false) {
                    return Err(Lwm2mError::UnsupportedContentFormat);
                }
                for entry in tlv::iter(payload) {
                    let entry = entry?;
                    if entry.kind != tlv::TlvType::ObjectInstance {
                        return Err(Lwm2mError::BadRequest);
                    }
                    self.ensure_instance(object, entry.id)?;
                    self.write_instance_tlv(object, entry.id, entry.value, false, false)?;
                }
                Ok(())
            }
            Path::Instance(object, instance) => {
                if !content_format.map(encoding::is_tlv).unwrap_or(false) {
                    return Err(Lwm2mError::UnsupportedContentFormat);
                }
                self.ensure_instance(object, instance)?;
                self.write_instance_tlv(object, instance, payload, false, false)
            }
            Path::Resource(object, instance, resource) => {
                let definition = self.store.resource_definition(object, resource)?;
                let value = decode_resource_payload(definition, content_format, payload)?;
                self.ensure_instance(object, instance)?;
                self.store.write(object, instance, resource, value)
            }
            Path::Root | Path::ResourceInstance(..) => Err(Lwm2mError::MethodNotAllowed),
        }
    }

    fn ensure_instance(&mut self, object: ObjectId, instance: InstanceId) -> Result<(), Lwm2mError> {
        if !self.store.has_instance(object, instance) {
            self.store.create_instance(object, Some(instance))?;
        }
        Ok(())
    }

    fn bootstrap_delete(&mut self, path: Path) -> Result<(), Lwm2mError> {
        match path {
            // Only the server accounts are cleared. The device and digital input instances are
            // created by the application at start-up and nothing re-creates them after bootstrap.
            Path::Root => {
                self.delete_all_instances(security::SECURITY_OBJECT_ID);
                self.delete_all_instances(server::SERVER_OBJECT_ID);
                Ok(())
            }
            Path::Object(object) => {
                self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
                self.delete_all_instances(object);
                Ok(())
            }
            Path::Instance(object, instance) => {
                if self.is_bootstrap_account(object, instance) {
                    return Err(Lwm2mError::BadRequest);
                }
                self.store.delete_instance(object, instance)
            }
            Path::Resource(..) | Path::ResourceInstance(..) => Err(Lwm2mError::MethodNotAllowed),
        }
    }

    fn is_bootstrap_account(&self, object: ObjectId, instance: InstanceId) -> bool {
        object == security::SECURITY_OBJECT_ID
            && self
                .store
                .value(object, instance, security::BOOTSTRAP_SERVER)
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    fn delete_all_instances(&mut self, object: ObjectId) {
        for instance in self.store.instances(object) {
            if !self.is_bootstrap_account(object, instance) {
                let _ = self.store.delete_instance(object, instance);
            }
        }
    }

    fn management_request(&mut self, now: u64, from: SocketAddr, request: &Request) -> Reply {
        let path = match Path::parse(request.path_segments()) {
            Ok(path) => path,
            Err(err) => return Reply::new(err.response_type()),
        };
        if path.object_id() == Some(security::SECURITY_OBJECT_ID) {
            return Reply::new(ResponseType::NotFound);
        }
        let result = match request.method {
            RequestType::Get if request.accept == Some(encoding::CONTENT_FORMAT_LINK) => self.discover(path),
            RequestType::Get => self.read_request(now, from, path, request),
            RequestType::Put if request.payload.is_empty() && !request.queries.is_empty() => {
                self.write_attributes(path, &request.queries).map(|_| Reply::new(ResponseType::Changed))
            }
            RequestType::Put => self.write(path, request.content_format, &request.payload, true).map(|_| Reply::new(ResponseType::Changed)),
            RequestType::Post => match path {
                Path::Object(object) => self.create(object, request.content_format, &request.payload),
                Path::Instance(..) => self.write(path, request.content_format, &request.payload, false).map(|_| Reply::new(ResponseType::Changed)),
                Path::Resource(..) => self.execute(path, &request.payload).map(|_| Reply::new(ResponseType::Changed)),
                Path::Root | Path::ResourceInstance(..) => Err(Lwm2mError::MethodNotAllowed),
            },
            RequestType::Delete => self.delete(path).map(|_| Reply::new(ResponseType::Deleted)),
            _ => Err(Lwm2mError::MethodNotAllowed),
        };
        match result {
            Ok(reply) => reply,
            Err(err) => {
                log::info!("{:?} {} failed: {}", request.method, path, err);
                Reply::new(err.response_type())
            }
        }
    }

    fn discover(&self, path: Path) -> Result<Reply, Lwm2mError> {
        let links = link_format::discover(&self.store, path, |p| self.observations.attributes(p))?;
        Ok(Reply::content(encoding::CONTENT_FORMAT_LINK, links.into_bytes()))
    }

    fn read_request(&mut self, now: u64, from: SocketAddr, path: Path, request: &Request) -> Result<Reply, Lwm2mError> {
        let mut reply = self.read(path, request.accept)?;
        match request.observe {
            Some(0) => {
                let sequence = self.observations.observe(from, request.token.clone(), path, request.accept, now);
                log::info!("Observing {} for {}", path, from);
                reply.observe = Some(sequence);
            }
            Some(1) => {
                if self.observations.cancel_token(from, &request.token) {
                    log::info!("Observation of {} cancelled", path);
                }
            }
            _ => {}
        }
        Ok(reply)
    }

    /// Read operation, formatted according to the Accept option.
    pub fn read(&self, path: Path, accept: Option<u16>) -> Result<Reply, Lwm2mError> {
        match path {
            Path::Resource(object, instance, resource) => {
                let definition = self.store.resource_definition(object, resource)?;
                if !definition.operations.readable() {
                    return Err(Lwm2mError::MethodNotAllowed);
                }
                let value = self.store.read(object, instance, resource)?;
                let format = match (accept, value) {
                    (Some(format), _) => format,
                    (None, ResourceValue::Single(Value::Opaque(_))) => encoding::CONTENT_FORMAT_OPAQUE,
                    (None, ResourceValue::Single(_)) => encoding::CONTENT_FORMAT_TEXT,
                    (None, ResourceValue::Multiple(_)) => encoding::CONTENT_FORMAT_TLV,
                };
                match (format, value) {
                    (format, value) if encoding::is_tlv(format) => {
                        let mut out = Vec::new();
                        tlv::encode_resource(&mut out, resource, value);
                        Ok(Reply::content(format, out))
                    }
                    (encoding::CONTENT_FORMAT_TEXT, ResourceValue::Single(value)) => Ok(Reply::content(format, text::encode(value)?)),
                    (encoding::CONTENT_FORMAT_OPAQUE, ResourceValue::Single(Value::Opaque(bytes))) => Ok(Reply::content(format, bytes.clone())),
                    _ => Err(Lwm2mError::NotAcceptable),
                }
            }
            Path::ResourceInstance(object, instance, resource, resource_instance) => {
                let definition = self.store.resource_definition(object, resource)?;
                if !definition.operations.readable() {
                    return Err(Lwm2mError::MethodNotAllowed);
                }
                let value = match self.store.read(object, instance, resource)? {
                    ResourceValue::Multiple(values) => values.get(&resource_instance).ok_or(Lwm2mError::NotFound)?,
                    ResourceValue::Single(_) => return Err(Lwm2mError::NotFound),
                };
                match accept {
                    Some(format) if encoding::is_tlv(format) => {
                        let mut out = Vec::new();
                        tlv::write_entry(&mut out, tlv::TlvType::ResourceInstance, resource_instance, &tlv::encode_value(value));
                        Ok(Reply::content(format, out))
                    }
                    Some(encoding::CONTENT_FORMAT_TEXT) | None => Ok(Reply::content(encoding::CONTENT_FORMAT_TEXT, text::encode(value)?)),
                    _ => Err(Lwm2mError::NotAcceptable),
                }
            }
            Path::Instance(object, instance) => {
                let format = tlv_format(accept)?;
                self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
                let out = self.encode_instance(object, instance).ok_or(Lwm2mError::NotFound)?;
                Ok(Reply::content(format, out))
            }
            Path::Object(object) => {
                let format = tlv_format(accept)?;
                self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
                let mut out = Vec::new();
                for instance in self.store.instances(object) {
                    if let Some(resources) = self.encode_instance(object, instance) {
                        tlv::write_entry(&mut out, tlv::TlvType::ObjectInstance, instance, &resources);
                    }
                }
                Ok(Reply::content(format, out))
            }
            Path::Root => Err(Lwm2mError::MethodNotAllowed),
        }
    }

    fn encode_instance(&self, object: ObjectId, instance: InstanceId) -> Option<Vec<u8>> {
        let definition = self.store.definition(object)?;
        let resources = self.store.resources(object, instance)?;
        let mut out = Vec::new();
        for (id, value) in resources.iter() {
            if definition.resource(*id).map(|r| r.operations.readable()).unwrap_or(false) {
                tlv::encode_resource(&mut out, *id, value);
            }
        }
        Some(out)
    }

    /// Write operation. `replace` (PUT) drops optional writable resources missing from an instance payload.
    fn write(&mut self, path: Path, content_format: Option<u16>, payload: &[u8], replace: bool) -> Result<(), Lwm2mError> {
        match path {
            Path::Resource(object, instance, resource) => {
                let definition = self.store.resource_definition(object, resource)?;
                if !definition.operations.writable() {
                    return Err(Lwm2mError::MethodNotAllowed);
                }
                if !self.store.has_instance(object, instance) {
                    return Err(Lwm2mError::NotFound);
                }
                let value = decode_resource_payload(definition, content_format, payload)?;
                self.store.write(object, instance, resource, value)?;
                self.written(path);
                Ok(())
            }
            Path::ResourceInstance(object, instance, resource, resource_instance) => {
                let definition = self.store.resource_definition(object, resource)?;
                if !definition.operations.writable() {
                    return Err(Lwm2mError::MethodNotAllowed);
                }
                let value = match content_format {
                    Some(format) if encoding::is_tlv(format) => {
                        let entry = tlv::iter(payload).next().ok_or(Lwm2mError::BadRequest)??;
                        tlv::decode_value(definition.kind, entry.value)?
                    }
                    Some(encoding::CONTENT_FORMAT_TEXT) | None => text::decode(definition.kind, payload)?,
                    Some(_) => return Err(Lwm2mError::UnsupportedContentFormat),
                };
                self.store.write_resource_instance(object, instance, resource, resource_instance, value)?;
                self.written(path);
                Ok(())
            }
            Path::Instance(object, instance) => {
                if !content_format.map(encoding::is_tlv).unwrap_or(false) {
                    return Err(Lwm2mError::UnsupportedContentFormat);
                }
                if !self.store.has_instance(object, instance) {
                    return Err(Lwm2mError::NotFound);
                }
                self.write_instance_tlv(object, instance, payload, replace, true)?;
                self.written(path);
                Ok(())
            }
            Path::Object(_) | Path::Root => Err(Lwm2mError::MethodNotAllowed),
        }
    }

    /// Decodes every resource of an instance payload before storing any of them.
    fn write_instance_tlv(&mut self, object: ObjectId, instance: InstanceId, payload: &[u8], replace: bool, check_access: bool) -> Result<(), Lwm2mError> {
        let mut entries = Vec::new();
        for entry in tlv::iter(payload) {
            let entry = entry?;
            match entry.kind {
                // Some servers wrap an instance write in its object instance entry.
                tlv::TlvType::ObjectInstance if entry.id == instance && entries.is_empty() => {
                    return self.write_instance_tlv(object, instance, entry.value, replace, check_access);
                }
                tlv::TlvType::Resource | tlv::TlvType::MultipleResource => {
                    let definition = self.store.resource_definition(object, entry.id)?;
                    if check_access && !definition.operations.writable() {
                        return Err(Lwm2mError::MethodNotAllowed);
                    }
                    entries.push((entry.id, tlv::decode_resource(&entry, definition.kind)?));
                }
                _ => return Err(Lwm2mError::BadRequest),
            }
        }

        if replace {
            let definition = self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
            let stale: Vec<_> = definition
                .resources
                .iter()
                .filter(|r| r.operations.writable() && !r.mandatory)
                .filter(|r| !entries.iter().any(|(id, _)| *id == r.id))
                .map(|r| r.id)
                .collect();
            for resource in stale {
                let present = self.store.resources(object, instance).map(|r| r.contains_key(&resource)).unwrap_or(false);
                if present {
                    self.store.remove_resource(object, instance, resource)?;
                    self.observations.mark_changed(Path::Resource(object, instance, resource));
                }
            }
        }
        for (resource, value) in entries {
            self.store.write(object, instance, resource, value)?;
            self.observations.mark_changed(Path::Resource(object, instance, resource));
        }
        Ok(())
    }

    /// Instance writes mark their resources in `write_instance_tlv`, so only single resources are marked here.
    fn written(&mut self, path: Path) {
        if let Path::Resource(..) | Path::ResourceInstance(..) = path {
            self.observations.mark_changed(path);
        }
        if let Path::Resource(server::SERVER_OBJECT_ID, _, server::LIFETIME) | Path::Instance(server::SERVER_OBJECT_ID, _) = path {
            self.update_requested = true;
        }
    }

    fn write_attributes(&mut self, path: Path, queries: &[String]) -> Result<(), Lwm2mError> {
        match path {
            Path::Object(object) => {
                self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
            }
            Path::Instance(object, instance) => {
                if !self.store.has_instance(object, instance) {
                    return Err(Lwm2mError::NotFound);
                }
            }
            Path::Resource(object, instance, resource) => {
                self.store.resource_definition(object, resource)?;
                if !self.store.has_instance(object, instance) {
                    return Err(Lwm2mError::NotFound);
                }
            }
            Path::Root | Path::ResourceInstance(..) => return Err(Lwm2mError::MethodNotAllowed),
        }
        let mut attributes = self.observations.attributes(path);
        attributes.apply_queries(queries.iter().map(String::as_str))?;
        log::debug!("Attributes of {} now {:?}", path, attributes);
        self.observations.set_attributes(path, attributes);
        Ok(())
    }

    fn execute(&mut self, path: Path, arguments: &[u8]) -> Result<(), Lwm2mError> {
        let (object, instance, resource) = match path {
            Path::Resource(object, instance, resource) => (object, instance, resource),
            _ => return Err(Lwm2mError::MethodNotAllowed),
        };
        let definition = self.store.resource_definition(object, resource)?;
        if !definition.operations.executable() {
            return Err(Lwm2mError::MethodNotAllowed);
        }
        if !self.store.has_instance(object, instance) {
            return Err(Lwm2mError::NotFound);
        }
        log::info!("Execute {}", path);
        match (object, resource) {
            (device::DEVICE_OBJECT_ID, device::REBOOT) => self.events.push_back(ClientEvent::Reboot),
            (device::DEVICE_OBJECT_ID, device::FACTORY_RESET) => self.events.push_back(ClientEvent::FactoryReset),
            (device::DEVICE_OBJECT_ID, device::RESET_ERROR_CODE) => {
                device::reset_error_codes(&mut self.store)?;
                self.observations.mark_changed(Path::Resource(object, instance, device::ERROR_CODE));
            }
            (server::SERVER_OBJECT_ID, server::REGISTRATION_UPDATE_TRIGGER) => self.update_requested = true,
            (server::SERVER_OBJECT_ID, server::DISABLE) => {
                let timeout = server::settings(&self.store, instance)
                    .map(|s| s.disable_timeout_s)
                    .unwrap_or(server::DEFAULT_DISABLE_TIMEOUT_S);
                self.disable_for_s = Some(timeout);
            }
            (digital_input::DIGITAL_INPUT_OBJECT_ID, digital_input::DIGITAL_INPUT_COUNTER_RESET) => {
                digital_input::reset_counter(&mut self.store, instance)?;
                self.observations.mark_changed(Path::Resource(object, instance, digital_input::DIGITAL_INPUT_COUNTER));
            }
            _ => self.events.push_back(ClientEvent::Execute {
                path,
                arguments: arguments.to_vec(),
            }),
        }
        Ok(())
    }

    fn create(&mut self, object: ObjectId, content_format: Option<u16>, payload: &[u8]) -> Result<Reply, Lwm2mError> {
        self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
        if !payload.is_empty() && !content_format.map(encoding::is_tlv).unwrap_or(false) {
            return Err(Lwm2mError::UnsupportedContentFormat);
        }

        let mut wrapped = Vec::new();
        for entry in tlv::iter(payload) {
            let entry = entry?;
            if entry.kind == tlv::TlvType::ObjectInstance {
                wrapped.push((entry.id, entry.value));
            }
        }
        let (instance, resources) = match wrapped.as_slice() {
            [] => (self.store.create_instance(object, None)?, payload),
            [(id, resources)] => (self.store.create_instance(object, Some(*id))?, *resources),
            _ => return Err(Lwm2mError::BadRequest),
        };
        if let Err(err) = self.write_instance_tlv(object, instance, resources, false, false) {
            let _ = self.store.delete_instance(object, instance);
            return Err(err);
        }

        log::info!("Created {}", Path::Instance(object, instance));
        self.tree_changed = true;
        self.observations.mark_changed(Path::Object(object));
        Ok(Reply {
            location: Path::Instance(object, instance).segments(),
            ..Reply::new(ResponseType::Created)
        })
    }

    fn delete(&mut self, path: Path) -> Result<(), Lwm2mError> {
        let (object, instance) = match path {
            Path::Instance(object, instance) => (object, instance),
            _ => return Err(Lwm2mError::MethodNotAllowed),
        };
        let definition = self.store.definition(object).ok_or(Lwm2mError::NotFound)?;
        if definition.mandatory && !definition.multiple_instances {
            return Err(Lwm2mError::MethodNotAllowed);
        }
        self.store.delete_instance(object, instance)?;
        log::info!("Deleted {}", path);
        self.observations.cancel_below(path);
        self.tree_changed = true;
        Ok(())
    }

    fn default_attributes(&self) -> Attributes {
        self.server.as_ref().map(|s| s.default_attributes).unwrap_or_default()
    }

    fn send_notifications(&mut self, now: u64, outbox: &mut Outbox) {
        let mut gone = Vec::new();
        for index in self.observations.due(now, self.default_attributes()) {
            let (server, token, path, accept) = match self.observations.get(index) {
                Some(o) => (o.server, o.token.clone(), o.path, o.accept),
                None => continue,
            };
            let mut reply = match self.read(path, accept) {
                Ok(reply) => reply,
                Err(err) => {
                    log::warn!("Dropping observation of {}: {}", path, err);
                    gone.push(index);
                    continue;
                }
            };
            let message_id = self.transport.next_message_id();
            reply.observe = self.observations.sent(index, now, message_id);
            match CoapEncoder::encode_notification(&token, message_id, &reply) {
                Ok(data) => {
                    log::debug!("Notifying {} of {}", server, path);
                    outbox.push(server, data);
                }
                Err(err) => log::error!("{}", err),
            }
        }
        for index in gone.into_iter().rev() {
            self.observations.remove(index);
        }
    }
}

fn tlv_format(accept: Option<u16>) -> Result<u16, Lwm2mError> {
    match accept {
        None => Ok(encoding::CONTENT_FORMAT_TLV),
        Some(format) if encoding::is_tlv(format) => Ok(format),
        Some(_) => Err(Lwm2mError::NotAcceptable),
    }
}

/// Decodes a single-resource payload (text, opaque or TLV).
fn decode_resource_payload(definition: &ResourceDefinition, content_format: Option<u16>, payload: &[u8]) -> Result<ResourceValue, Lwm2mError> {
    match content_format {
        Some(format) if encoding::is_tlv(format) => {
            let entry = tlv::iter(payload).next().ok_or(Lwm2mError::BadRequest)??;
            if entry.id != definition.id {
                return Err(Lwm2mError::BadRequest);
            }
            tlv::decode_resource(&entry, definition.kind)
        }
        _ if definition.multiple => Err(Lwm2mError::BadRequest),
        Some(encoding::CONTENT_FORMAT_OPAQUE) => match definition.kind {
            crate::object::ResourceKind::Opaque => Ok(ResourceValue::Single(Value::Opaque(payload.to_vec()))),
            _ => Err(Lwm2mError::UnsupportedContentFormat),
        },
        Some(encoding::CONTENT_FORMAT_TEXT) | None => Ok(ResourceValue::Single(text::decode(definition.kind, payload)?)),
        Some(_) => Err(Lwm2mError::UnsupportedContentFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap_mapping::{decode_uint, encode_uint};
    use crate::objects::device::DeviceInformation;
    use crate::transport::ACK_TIMEOUT_MS;
    use coap_lite::{CoapOption, MessageClass, MessageType, Packet};

    const BOOTSTRAP: &str = "[fd00::1]:15683";
    const SERVER: &str = "[fd00::2]:5683";

    fn bootstrap_addr() -> SocketAddr {
        BOOTSTRAP.parse().unwrap()
    }

    fn server_addr() -> SocketAddr {
        SERVER.parse().unwrap()
    }

    fn base_client() -> Lwm2mClient {
        let mut client = Lwm2mClient::new(ClientOptions::default());
        let store = client.store_mut();
        security::register_security_object(store).unwrap();
        server::register_server_object(store).unwrap();
        device::register_device_object(store, &DeviceInformation::default()).unwrap();
        digital_input::register_digital_input_object(store).unwrap();
        digital_input::add_digital_input(store, 0).unwrap();
        digital_input::add_digital_input(store, 1).unwrap();
        client
    }

    fn provision_server(store: &mut ObjectStore) {
        let instance = store.create_instance(security::SECURITY_OBJECT_ID, None).unwrap();
        store
            .set(security::SECURITY_OBJECT_ID, instance, security::SERVER_URI, Value::String(format!("coap://{}", SERVER)))
            .unwrap();
        store
            .set(security::SECURITY_OBJECT_ID, instance, security::SECURITY_MODE, Value::Integer(security::SECURITY_MODE_NO_SEC))
            .unwrap();
        store.set(security::SECURITY_OBJECT_ID, instance, security::SHORT_SERVER_ID, Value::Integer(101)).unwrap();
        let instance = store.create_instance(server::SERVER_OBJECT_ID, None).unwrap();
        store.set(server::SERVER_OBJECT_ID, instance, server::SHORT_SERVER_ID, Value::Integer(101)).unwrap();
        store.set(server::SERVER_OBJECT_ID, instance, server::LIFETIME, Value::Integer(300)).unwrap();
    }

    fn drain(outbox: &mut Outbox) -> Vec<(SocketAddr, Packet)> {
        let mut sent = Vec::new();
        while let Some(datagram) = outbox.pop() {
            sent.push((datagram.to, Packet::from_bytes(&datagram.data).unwrap()));
        }
        sent
    }

    fn only(outbox: &mut Outbox) -> (SocketAddr, Packet) {
        let mut sent = drain(outbox);
        assert_eq!(sent.len(), 1, "expected exactly one datagram");
        sent.remove(0)
    }

    fn strings(packet: &Packet, option: CoapOption) -> Vec<String> {
        packet
            .get_option(option)
            .map(|values| values.iter().map(|v| String::from_utf8(v.clone()).unwrap()).collect())
            .unwrap_or_default()
    }

    fn uint(packet: &Packet, option: CoapOption) -> Option<u32> {
        packet.get_option(option).and_then(|values| values.front()).and_then(|v| decode_uint(v))
    }

    fn code(packet: &Packet) -> ResponseType {
        match packet.header.code {
            MessageClass::Response(code) => code,
            other => panic!("expected a response, got {:?}", other),
        }
    }

    fn request(method: RequestType, message_id: u16, path: &str) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_version(1);
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(method);
        packet.header.message_id = message_id;
        packet.set_token(vec![0xA5, message_id as u8]);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        packet
    }

    fn with_payload(mut packet: Packet, content_format: u16, payload: Vec<u8>) -> Packet {
        packet.add_option(CoapOption::ContentFormat, encode_uint(content_format as u32));
        packet.payload = payload;
        packet
    }

    fn reply_to(request: &Packet, code: ResponseType) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_version(1);
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.code = MessageClass::Response(code);
        packet.header.message_id = request.header.message_id;
        packet.set_token(request.get_token().to_vec());
        packet
    }

    fn deliver(client: &mut Lwm2mClient, now: u64, from: SocketAddr, packet: &Packet, outbox: &mut Outbox) {
        client.handle_datagram(now, from, &packet.to_bytes().unwrap(), outbox);
    }

    /// Delivers a request and returns the single response sent back to its origin.
    fn exchange(client: &mut Lwm2mClient, now: u64, from: SocketAddr, packet: &Packet) -> Packet {
        let mut outbox = Outbox::new();
        deliver(client, now, from, packet, &mut outbox);
        let (to, response) = only(&mut outbox);
        assert_eq!(to, from);
        response
    }

    fn registered_client() -> Lwm2mClient {
        let mut client = base_client();
        provision_server(client.store_mut());
        let mut outbox = Outbox::new();
        client.process(0, &mut outbox);
        let (to, register) = only(&mut outbox);
        assert_eq!(to, server_addr());

        let mut created = reply_to(&register, ResponseType::Created);
        created.add_option(CoapOption::LocationPath, b"rd".to_vec());
        created.add_option(CoapOption::LocationPath, b"5a3f".to_vec());
        deliver(&mut client, 100, server_addr(), &created, &mut outbox);
        assert!(outbox.is_empty());
        assert_eq!(client.poll_event(), Some(ClientEvent::Registered));
        client
    }

    fn tlv_resource(out: &mut Vec<u8>, id: u16, value: Value) {
        tlv::write_entry(out, tlv::TlvType::Resource, id, &tlv::encode_value(&value));
    }

    #[test]
    fn bootstrap_then_register_then_update() {
        let mut client = base_client();
        security::populate_security_object(client.store_mut(), &format!("coap://{}/", BOOTSTRAP)).unwrap();
        let mut outbox = Outbox::new();

        assert_eq!(client.process(0, &mut outbox), ACK_TIMEOUT_MS);
        let (to, bootstrap_request) = only(&mut outbox);
        assert_eq!(to, bootstrap_addr());
        assert_eq!(bootstrap_request.header.get_type(), MessageType::Confirmable);
        assert_eq!(strings(&bootstrap_request, CoapOption::UriPath), vec!["bs"]);
        assert_eq!(strings(&bootstrap_request, CoapOption::UriQuery), vec!["ep=ButtonDevice"]);

        deliver(&mut client, 10, bootstrap_addr(), &reply_to(&bootstrap_request, ResponseType::Changed), &mut outbox);
        assert_eq!(client.state(), ClientState::BootstrapInProgress { deadline: 10 + BOOTSTRAP_TIMEOUT_MS });

        let mut account = Vec::new();
        tlv_resource(&mut account, security::SERVER_URI, Value::String(format!("coap://{}", SERVER)));
        tlv_resource(&mut account, security::BOOTSTRAP_SERVER, Value::Boolean(false));
        tlv_resource(&mut account, security::SECURITY_MODE, Value::Integer(security::SECURITY_MODE_NO_SEC));
        tlv_resource(&mut account, security::SHORT_SERVER_ID, Value::Integer(101));
        let put = with_payload(request(RequestType::Put, 0x100, "/0/1"), encoding::CONTENT_FORMAT_TLV, account);
        assert_eq!(code(&exchange(&mut client, 20, bootstrap_addr(), &put)), ResponseType::Changed);

        let mut settings = Vec::new();
        tlv_resource(&mut settings, server::SHORT_SERVER_ID, Value::Integer(101));
        tlv_resource(&mut settings, server::LIFETIME, Value::Integer(300));
        tlv_resource(&mut settings, server::BINDING, Value::String(String::from("U")));
        let put = with_payload(request(RequestType::Put, 0x101, "/1/0"), encoding::CONTENT_FORMAT_TLV, settings);
        assert_eq!(code(&exchange(&mut client, 30, bootstrap_addr(), &put)), ResponseType::Changed);

        let finish = request(RequestType::Post, 0x102, "/bs");
        assert_eq!(code(&exchange(&mut client, 40, bootstrap_addr(), &finish)), ResponseType::Changed);
        assert_eq!(client.poll_event(), Some(ClientEvent::Bootstrapped));

        client.process(50, &mut outbox);
        let (to, register) = only(&mut outbox);
        assert_eq!(to, server_addr());
        assert_eq!(strings(&register, CoapOption::UriPath), vec!["rd"]);
        assert_eq!(strings(&register, CoapOption::UriQuery), vec!["ep=ButtonDevice", "lt=300", "lwm2m=1.0", "b=U"]);
        let links = String::from_utf8(register.payload.clone()).unwrap();
        assert!(links.contains("</3200/1>"));
        assert!(!links.contains("</0/"));

        let mut created = reply_to(&register, ResponseType::Created);
        created.add_option(CoapOption::LocationPath, b"rd".to_vec());
        created.add_option(CoapOption::LocationPath, b"5a3f".to_vec());
        deliver(&mut client, 60, server_addr(), &created, &mut outbox);
        assert_eq!(client.poll_event(), Some(ClientEvent::Registered));
        assert_eq!(client.registration_location().as_deref(), Some("/rd/5a3f"));
        assert_eq!(client.state(), ClientState::Registered { update_at: 60 + 270_000 });

        client.process(60 + 270_000, &mut outbox);
        let (_, update) = only(&mut outbox);
        assert_eq!(update.header.code, MessageClass::Request(RequestType::Post));
        assert_eq!(strings(&update, CoapOption::UriPath), vec!["rd", "5a3f"]);
        assert!(update.payload.is_empty());
    }

    #[test]
    fn bootstrap_finish_requires_server_account() {
        let mut client = base_client();
        security::populate_security_object(client.store_mut(), &format!("coap://{}/", BOOTSTRAP)).unwrap();
        let mut outbox = Outbox::new();
        client.process(0, &mut outbox);
        drain(&mut outbox);

        let finish = request(RequestType::Post, 1, "/bs");
        assert_eq!(code(&exchange(&mut client, 10, bootstrap_addr(), &finish)), ResponseType::NotAcceptable);
        let read = request(RequestType::Get, 2, "/3/0");
        assert_eq!(code(&exchange(&mut client, 10, bootstrap_addr(), &read)), ResponseType::MethodNotAllowed);
    }

    #[test]
    fn bootstrap_delete_keeps_bootstrap_account() {
        let mut client = base_client();
        security::populate_security_object(client.store_mut(), &format!("coap://{}/", BOOTSTRAP)).unwrap();
        provision_server(client.store_mut());
        // A provisioned server account skips bootstrap, so force it.
        client.state = ClientState::BootstrapInProgress { deadline: 1_000 };
        client.bootstrap_peer = Some(bootstrap_addr());

        let delete = request(RequestType::Delete, 1, "/");
        assert_eq!(code(&exchange(&mut client, 10, bootstrap_addr(), &delete)), ResponseType::Deleted);
        assert_eq!(client.store().instances(security::SECURITY_OBJECT_ID), vec![0]);
        assert!(client.store().instances(server::SERVER_OBJECT_ID).is_empty());
        assert_eq!(client.store().instances(device::DEVICE_OBJECT_ID), vec![0]);
        assert_eq!(client.store().instances(digital_input::DIGITAL_INPUT_OBJECT_ID), vec![0, 1]);
    }

    #[test]
    fn bootstrap_times_out_and_retries() {
        let mut client = base_client();
        security::populate_security_object(client.store_mut(), &format!("coap://{}/", BOOTSTRAP)).unwrap();
        let mut outbox = Outbox::new();
        client.process(0, &mut outbox);
        let (_, bootstrap_request) = only(&mut outbox);
        deliver(&mut client, 10, bootstrap_addr(), &reply_to(&bootstrap_request, ResponseType::Changed), &mut outbox);

        client.process(10 + BOOTSTRAP_TIMEOUT_MS, &mut outbox);
        assert_eq!(
            client.state(),
            ClientState::BootstrapHoldOff {
                until: 10 + BOOTSTRAP_TIMEOUT_MS + REGISTRATION_BACKOFF_MIN_MS
            }
        );
        client.process(10 + BOOTSTRAP_TIMEOUT_MS + REGISTRATION_BACKOFF_MIN_MS, &mut outbox);
        let (to, retry) = only(&mut outbox);
        assert_eq!(to, bootstrap_addr());
        assert_eq!(strings(&retry, CoapOption::UriPath), vec!["bs"]);
    }

    #[test]
    fn unknown_peer_is_unauthorized() {
        let mut client = registered_client();
        let stranger: SocketAddr = "[fd00::9]:5683".parse().unwrap();
        let read = request(RequestType::Get, 1, "/3/0");
        assert_eq!(code(&exchange(&mut client, 200, stranger, &read)), ResponseType::Unauthorized);
    }

    #[test]
    fn read_in_requested_formats() {
        let mut client = registered_client();

        let response = exchange(&mut client, 200, server_addr(), &request(RequestType::Get, 1, "/3200/0/5501"));
        assert_eq!(code(&response), ResponseType::Content);
        assert_eq!(uint(&response, CoapOption::ContentFormat), Some(encoding::CONTENT_FORMAT_TEXT as u32));
        assert_eq!(response.payload, b"0");

        let mut tlv_read = request(RequestType::Get, 2, "/3/0/0");
        tlv_read.add_option(CoapOption::Accept, encode_uint(encoding::CONTENT_FORMAT_TLV as u32));
        let response = exchange(&mut client, 200, server_addr(), &tlv_read);
        let entry = tlv::iter(&response.payload).next().unwrap().unwrap();
        assert_eq!(entry.kind, tlv::TlvType::Resource);
        assert_eq!(entry.value, b"Imagination Technologies");

        let response = exchange(&mut client, 200, server_addr(), &request(RequestType::Get, 3, "/3200/0"));
        assert_eq!(uint(&response, CoapOption::ContentFormat), Some(encoding::CONTENT_FORMAT_TLV as u32));

        let response = exchange(&mut client, 200, server_addr(), &request(RequestType::Get, 4, "/0/0"));
        assert_eq!(code(&response), ResponseType::NotFound);
        let response = exchange(&mut client, 200, server_addr(), &request(RequestType::Get, 5, "/3/0/4"));
        assert_eq!(code(&response), ResponseType::MethodNotAllowed);

        let mut opaque_read = request(RequestType::Get, 6, "/3/0/0");
        opaque_read.add_option(CoapOption::Accept, encode_uint(encoding::CONTENT_FORMAT_OPAQUE as u32));
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &opaque_read)), ResponseType::NotAcceptable);
    }

    #[test]
    fn write_checks_access_and_format() {
        let mut client = registered_client();

        let put = with_payload(request(RequestType::Put, 1, "/3200/0/5750"), encoding::CONTENT_FORMAT_TEXT, b"Door".to_vec());
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &put)), ResponseType::Changed);
        assert_eq!(
            client.store().value(digital_input::DIGITAL_INPUT_OBJECT_ID, 0, digital_input::APPLICATION_TYPE),
            Some(&Value::String(String::from("Door")))
        );

        let put = with_payload(request(RequestType::Put, 2, "/3200/0/5501"), encoding::CONTENT_FORMAT_TEXT, b"5".to_vec());
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &put)), ResponseType::MethodNotAllowed);

        let put = with_payload(request(RequestType::Put, 3, "/3200/0/5750"), 60, vec![0x61]);
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &put)), ResponseType::UnsupportedContentFormat);

        let put = with_payload(request(RequestType::Put, 4, "/3200/0/5503"), encoding::CONTENT_FORMAT_TEXT, b"soon".to_vec());
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &put)), ResponseType::BadRequest);

        let mut partial = Vec::new();
        tlv_resource(&mut partial, digital_input::DIGITAL_INPUT_POLARITY, Value::Boolean(true));
        let post = with_payload(request(RequestType::Post, 5, "/3200/1"), encoding::CONTENT_FORMAT_TLV, partial);
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::Changed);
        assert_eq!(
            client.store().value(digital_input::DIGITAL_INPUT_OBJECT_ID, 1, digital_input::DIGITAL_INPUT_POLARITY),
            Some(&Value::Boolean(true))
        );
    }

    #[test]
    fn execute_counter_reset_and_reboot() {
        let mut client = registered_client();
        digital_input::increment_counter(&mut client, 0).unwrap();
        digital_input::increment_counter(&mut client, 0).unwrap();

        let post = request(RequestType::Post, 1, "/3200/0/5505");
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::Changed);
        assert_eq!(digital_input::counter(client.store(), 0), Some(0));

        let post = request(RequestType::Post, 2, "/3/0/4");
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::Changed);
        assert_eq!(client.poll_event(), Some(ClientEvent::Reboot));

        let post = request(RequestType::Post, 3, "/3200/0/5501");
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::MethodNotAllowed);
    }

    #[test]
    fn registration_update_trigger_sends_update() {
        let mut client = registered_client();
        let post = request(RequestType::Post, 1, "/1/0/8");
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::Changed);

        let mut outbox = Outbox::new();
        client.process(300, &mut outbox);
        let (to, update) = only(&mut outbox);
        assert_eq!(to, server_addr());
        assert_eq!(strings(&update, CoapOption::UriPath), vec!["rd", "5a3f"]);
        assert_eq!(client.state(), ClientState::Updating);

        deliver(&mut client, 400, server_addr(), &reply_to(&update, ResponseType::Changed), &mut outbox);
        assert_eq!(client.state(), ClientState::Registered { update_at: 400 + 270_000 });
    }

    #[test]
    fn update_not_found_registers_again() {
        let mut client = registered_client();
        let mut outbox = Outbox::new();
        client.process(100 + 270_000, &mut outbox);
        let (_, update) = only(&mut outbox);

        deliver(&mut client, 100 + 270_010, server_addr(), &reply_to(&update, ResponseType::NotFound), &mut outbox);
        client.process(100 + 270_020, &mut outbox);
        let (_, register) = only(&mut outbox);
        assert_eq!(strings(&register, CoapOption::UriPath), vec!["rd"]);
        assert_eq!(client.state(), ClientState::Registering);
    }

    #[test]
    fn unanswered_register_is_retransmitted_then_backed_off() {
        let mut client = base_client();
        provision_server(client.store_mut());
        let mut outbox = Outbox::new();
        client.process(0, &mut outbox);
        let (_, first) = only(&mut outbox);

        for now in [2_000, 6_000, 14_000, 30_000] {
            client.process(now, &mut outbox);
            let (_, retransmission) = only(&mut outbox);
            assert_eq!(retransmission.header.message_id, first.header.message_id);
        }

        assert_eq!(client.process(62_000, &mut outbox), REGISTRATION_BACKOFF_MIN_MS);
        assert!(outbox.is_empty());
        client.process(62_000 + REGISTRATION_BACKOFF_MIN_MS, &mut outbox);
        let (_, retry) = only(&mut outbox);
        assert_ne!(retry.header.message_id, first.header.message_id);
    }

    #[test]
    fn observe_notifies_after_pmin() {
        let mut client = registered_client();

        let mut attributes = request(RequestType::Put, 1, "/3200/0/5501");
        attributes.add_option(CoapOption::UriQuery, b"pmin=10".to_vec());
        assert_eq!(code(&exchange(&mut client, 100, server_addr(), &attributes)), ResponseType::Changed);

        let mut observe = request(RequestType::Get, 2, "/3200/0/5501");
        observe.add_option(CoapOption::Observe, encode_uint(0));
        let response = exchange(&mut client, 100, server_addr(), &observe);
        assert_eq!(code(&response), ResponseType::Content);
        assert_eq!(uint(&response, CoapOption::Observe), Some(0));
        assert_eq!(response.payload, b"0");

        digital_input::increment_counter(&mut client, 0).unwrap();
        let mut outbox = Outbox::new();
        assert_eq!(client.process(200, &mut outbox), 9_900);
        assert!(outbox.is_empty());

        client.process(10_100, &mut outbox);
        let (to, notification) = only(&mut outbox);
        assert_eq!(to, server_addr());
        assert_eq!(notification.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(notification.get_token(), observe.get_token());
        assert_eq!(uint(&notification, CoapOption::Observe), Some(1));
        assert_eq!(notification.payload, b"1");

        let mut reset = Packet::new();
        reset.header.set_version(1);
        reset.header.set_type(MessageType::Reset);
        reset.header.code = MessageClass::Empty;
        reset.header.message_id = notification.header.message_id;
        deliver(&mut client, 10_200, server_addr(), &reset, &mut outbox);

        digital_input::increment_counter(&mut client, 0).unwrap();
        client.process(40_000, &mut outbox);
        assert!(outbox.is_empty());
    }

    fn observe(client: &mut Lwm2mClient, message_id: u16, path: &str) -> Packet {
        let mut observe = request(RequestType::Get, message_id, path);
        observe.add_option(CoapOption::Observe, encode_uint(0));
        let response = exchange(client, 100, server_addr(), &observe);
        assert_eq!(uint(&response, CoapOption::Observe), Some(0));
        observe
    }

    #[test]
    fn observe_cancelled_by_observe_one() {
        let mut client = registered_client();
        let observe = observe(&mut client, 1, "/3200/0/5501");

        let mut cancel = request(RequestType::Get, 2, "/3200/0/5501");
        cancel.set_token(observe.get_token().to_vec());
        cancel.add_option(CoapOption::Observe, encode_uint(1));
        let response = exchange(&mut client, 150, server_addr(), &cancel);
        assert_eq!(code(&response), ResponseType::Content);
        assert_eq!(uint(&response, CoapOption::Observe), None);
        assert_eq!(response.payload, b"0");

        digital_input::increment_counter(&mut client, 0).unwrap();
        let mut outbox = Outbox::new();
        client.process(200, &mut outbox);
        client.process(60_000, &mut outbox);
        assert!(outbox.is_empty());
    }

    #[test]
    fn instance_write_notifies_only_written_resources() {
        let mut client = registered_client();
        observe(&mut client, 1, "/3200/0/5501");
        let instance = observe(&mut client, 2, "/3200/0");

        let mut partial = Vec::new();
        tlv_resource(&mut partial, digital_input::DIGITAL_INPUT_POLARITY, Value::Boolean(true));
        let post = with_payload(request(RequestType::Post, 3, "/3200/0"), encoding::CONTENT_FORMAT_TLV, partial);
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::Changed);

        let mut outbox = Outbox::new();
        client.process(300, &mut outbox);
        let (to, notification) = only(&mut outbox);
        assert_eq!(to, server_addr());
        assert_eq!(notification.get_token(), instance.get_token());
        assert_eq!(uint(&notification, CoapOption::Observe), Some(1));
    }

    #[test]
    fn separate_response_after_empty_ack() {
        let mut client = registered_client();
        let post = request(RequestType::Post, 1, "/1/0/8");
        assert_eq!(code(&exchange(&mut client, 200, server_addr(), &post)), ResponseType::Changed);
        let mut outbox = Outbox::new();
        client.process(300, &mut outbox);
        let (_, update) = only(&mut outbox);

        let mut ack = Packet::new();
        ack.header.set_version(1);
        ack.header.set_type(MessageType::Acknowledgement);
        ack.header.code = MessageClass::Empty;
        ack.header.message_id = update.header.message_id;
        deliver(&mut client, 400, server_addr(), &ack, &mut outbox);
        assert!(outbox.is_empty());

        // No retransmission while waiting for the separate response.
        client.process(10_000, &mut outbox);
        assert!(outbox.is_empty());
        assert_eq!(client.state(), ClientState::Updating);

        let mut changed = Packet::new();
        changed.header.set_version(1);
        changed.header.set_type(MessageType::Confirmable);
        changed.header.code = MessageClass::Response(ResponseType::Changed);
        changed.header.message_id = 0x4242;
        changed.set_token(update.get_token().to_vec());
        deliver(&mut client, 12_000, server_addr(), &changed, &mut outbox);

        let (to, ack) = only(&mut outbox);
        assert_eq!(to, server_addr());
        assert_eq!(ack.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(ack.header.code, MessageClass::Empty);
        assert_eq!(ack.header.message_id, 0x4242);
        assert_eq!(client.state(), ClientState::Registered { update_at: 12_000 + 270_000 });
    }

    #[test]
    fn zero_lifetime_option_uses_default_lifetime() {
        let mut client = base_client();
        client.options.lifetime_s = 0;
        provision_server(client.store_mut());
        client.store_mut().delete_instance(server::SERVER_OBJECT_ID, 0).unwrap();

        let mut outbox = Outbox::new();
        client.process(0, &mut outbox);
        let (_, register) = only(&mut outbox);
        let lifetime = format!("lt={}", server::DEFAULT_LIFETIME_S);
        assert!(strings(&register, CoapOption::UriQuery).contains(&lifetime));

        deliver(&mut client, 100, server_addr(), &reply_to(&register, ResponseType::Created), &mut outbox);
        assert_eq!(
            client.state(),
            ClientState::Registered {
                update_at: 100 + server::DEFAULT_LIFETIME_S as u64 * 900
            }
        );
        for now in 101..=110 {
            client.process(now, &mut outbox);
        }
        assert!(outbox.is_empty());
    }

    #[test]
    fn discover_shows_attributes() {
        let mut client = registered_client();
        let mut attributes = request(RequestType::Put, 1, "/3200/0/5501");
        attributes.add_option(CoapOption::UriQuery, b"pmin=1".to_vec());
        attributes.add_option(CoapOption::UriQuery, b"pmax=60".to_vec());
        assert_eq!(code(&exchange(&mut client, 100, server_addr(), &attributes)), ResponseType::Changed);

        let mut discover = request(RequestType::Get, 2, "/3200/0");
        discover.add_option(CoapOption::Accept, encode_uint(encoding::CONTENT_FORMAT_LINK as u32));
        let response = exchange(&mut client, 100, server_addr(), &discover);
        assert_eq!(uint(&response, CoapOption::ContentFormat), Some(encoding::CONTENT_FORMAT_LINK as u32));
        let links = String::from_utf8(response.payload).unwrap();
        assert!(links.starts_with("</3200/0>"));
        assert!(links.contains("</3200/0/5501>;pmin=1;pmax=60"));
    }

    #[test]
    fn duplicate_create_is_answered_from_cache() {
        let mut client = registered_client();
        let create = request(RequestType::Post, 7, "/3200");

        let first = exchange(&mut client, 100, server_addr(), &create);
        assert_eq!(code(&first), ResponseType::Created);
        assert_eq!(strings(&first, CoapOption::LocationPath), vec!["3200", "2"]);
        let second = exchange(&mut client, 150, server_addr(), &create);
        assert_eq!(second.to_bytes().unwrap(), first.to_bytes().unwrap());
        assert_eq!(client.store().instances(digital_input::DIGITAL_INPUT_OBJECT_ID), vec![0, 1, 2]);

        let mut outbox = Outbox::new();
        client.process(200, &mut outbox);
        let (_, update) = only(&mut outbox);
        let links = String::from_utf8(update.payload).unwrap();
        assert!(links.contains("</3200/2>"));
    }

    #[test]
    fn delete_instances() {
        let mut client = registered_client();
        let delete = request(RequestType::Delete, 1, "/3200/1");
        assert_eq!(code(&exchange(&mut client, 100, server_addr(), &delete)), ResponseType::Deleted);
        assert_eq!(client.store().instances(digital_input::DIGITAL_INPUT_OBJECT_ID), vec![0]);

        let mut outbox = Outbox::new();
        client.process(100, &mut outbox);
        let (to, update) = only(&mut outbox);
        assert_eq!(to, server_addr());
        assert_eq!(strings(&update, CoapOption::UriPath), vec!["rd", "5a3f"]);
        let links = String::from_utf8(update.payload).unwrap();
        assert!(links.contains("</3200/0>"));
        assert!(!links.contains("</3200/1>"));

        let delete = request(RequestType::Delete, 2, "/3/0");
        assert_eq!(code(&exchange(&mut client, 100, server_addr(), &delete)), ResponseType::MethodNotAllowed);
        let delete = request(RequestType::Delete, 3, "/3200");
        assert_eq!(code(&exchange(&mut client, 100, server_addr(), &delete)), ResponseType::MethodNotAllowed);
    }

    #[test]
    fn server_disable_deregisters_for_timeout() {
        let mut client = registered_client();
        let post = request(RequestType::Post, 1, "/1/0/4");
        assert_eq!(code(&exchange(&mut client, 100, server_addr(), &post)), ResponseType::Changed);

        let mut outbox = Outbox::new();
        client.process(200, &mut outbox);
        let (_, deregister) = only(&mut outbox);
        assert_eq!(deregister.header.code, MessageClass::Request(RequestType::Delete));
        assert_eq!(strings(&deregister, CoapOption::UriPath), vec!["rd", "5a3f"]);

        deliver(&mut client, 300, server_addr(), &reply_to(&deregister, ResponseType::Deleted), &mut outbox);
        assert_eq!(client.poll_event(), Some(ClientEvent::Deregistered));
        assert_eq!(
            client.state(),
            ClientState::Disabled {
                until: 300 + server::DEFAULT_DISABLE_TIMEOUT_S as u64 * 1000
            }
        );
    }

    #[test]
    fn ping_is_answered_with_reset() {
        let mut client = registered_client();
        let mut ping = Packet::new();
        ping.header.set_version(1);
        ping.header.set_type(MessageType::Confirmable);
        ping.header.code = MessageClass::Empty;
        ping.header.message_id = 77;
        let response = exchange(&mut client, 100, server_addr(), &ping);
        assert_eq!(response.header.get_type(), MessageType::Reset);
        assert_eq!(response.header.message_id, 77);
    }
}
