//! Type system queries: loaded assemblies, app domains and name resolution.

use super::{Version, NAME_SIZE};
use crate::cancel::CancelToken;
use crate::engine::{ConnectionSource, Engine};
use crate::error::{Error, ErrorKind, Result, WireError};
use crate::wire::{Command, Decode, WireReader};
use log::warn;
use serde::Serialize;

/// A loaded assembly. Part of a [`DeviceInfo`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyInfo {
    pub index: u32,
    pub name: String,
    pub version: Version,
    pub flags: u32,
    /// App domains that have this assembly loaded.
    pub app_domains: Vec<u32>,
}

struct ResolvedAssembly {
    flags: u32,
    name: String,
    version: Version,
}

impl Decode for ResolvedAssembly {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { flags: r.u32()?, name: r.fixed_str(NAME_SIZE)?, version: r.get()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppDomainInfo {
    pub id: u32,
    pub name: String,
    pub state: u32,
    /// Indices of the assemblies loaded into this domain.
    pub assemblies: Vec<u32>,
}

struct ResolvedAppDomain {
    state: u32,
    name: String,
    assemblies: Vec<u32>,
}

impl Decode for ResolvedAppDomain {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { state: r.u32()?, name: r.cstr()?, assemblies: r.get()? })
    }
}

/// Point-in-time view of what the device has loaded. It does not follow
/// later resets or deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub source: ConnectionSource,
    pub assemblies: Vec<AssemblyInfo>,
    pub app_domains: Vec<AppDomainInfo>,
    /// Session generation the snapshot was taken in.
    pub generation: u64,
}

impl DeviceInfo {
    pub fn assembly(&self, name: &str) -> Option<&AssemblyInfo> {
        self.assemblies.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub index: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub index: u32,
    pub declaring_type: u32,
    pub offset: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub index: u32,
    pub declaring_type: u32,
    pub name: String,
}

/// Resolution failures that only lose one entry. Anything else ends the query.
fn skippable(e: &Error) -> bool {
    matches!(e.kind(), ErrorKind::Protocol | ErrorKind::Framing | ErrorKind::Timeout)
        && !matches!(e, Error::StaleSession | Error::NotSupportedInState { .. })
}

fn check_count(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        warn!("Device reported {expected} {what} but {actual} resolved");
        Err(Error::CountMismatch { what, expected, actual })
    }
}

impl Engine {
    /// Resolve every loaded assembly.
    ///
    /// Fails with [`Error::CountMismatch`] if any reported assembly could not
    /// be resolved.
    pub fn assemblies(&self, cancel: &CancelToken) -> Result<Vec<AssemblyInfo>> {
        let timeout = self.config().request_timeout();
        let indices: Vec<u32> = self.call(Command::TYPESYS_ASSEMBLIES, &(), timeout, cancel)?;

        let mut resolved = Vec::with_capacity(indices.len());
        for &index in &indices {
            match self.call::<_, ResolvedAssembly>(Command::RESOLVE_ASSEMBLY, &index, timeout, cancel) {
                Ok(a) => resolved.push(AssemblyInfo {
                    index,
                    name: a.name,
                    version: a.version,
                    flags: a.flags,
                    app_domains: Vec::new(),
                }),
                Err(e) if skippable(&e) => warn!("Could not resolve assembly {index}: {e}"),
                Err(e) => return Err(e),
            }
        }
        check_count("assemblies", indices.len(), resolved.len())?;
        Ok(resolved)
    }

    /// Resolve every app domain. Requires app domain support on the device.
    pub fn app_domains(&self, cancel: &CancelToken) -> Result<Vec<AppDomainInfo>> {
        let supported = self.capabilities().is_some_and(|caps| caps.app_domains());
        if !supported {
            return Err(Error::CapabilityMissing("app domains"));
        }

        let timeout = self.config().request_timeout();
        let ids: Vec<u32> = self.call(Command::TYPESYS_APPDOMAINS, &(), timeout, cancel)?;

        let mut resolved = Vec::with_capacity(ids.len());
        for &id in &ids {
            match self.call::<_, ResolvedAppDomain>(Command::RESOLVE_APPDOMAIN, &id, timeout, cancel) {
                Ok(d) => resolved.push(AppDomainInfo { id, name: d.name, state: d.state, assemblies: d.assemblies }),
                Err(e) if skippable(&e) => warn!("Could not resolve app domain {id}: {e}"),
                Err(e) => return Err(e),
            }
        }
        check_count("app domains", ids.len(), resolved.len())?;
        Ok(resolved)
    }

    /// Snapshot of loaded assemblies and app domains, cross-referenced.
    pub fn device_info(&self, cancel: &CancelToken) -> Result<DeviceInfo> {
        let generation = self.generation();
        let mut assemblies = self.assemblies(cancel)?;
        let app_domains = match self.app_domains(cancel) {
            Ok(domains) => domains,
            Err(Error::CapabilityMissing(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        for assembly in &mut assemblies {
            assembly.app_domains =
                app_domains.iter().filter(|d| d.assemblies.contains(&assembly.index)).map(|d| d.id).collect();
        }
        Ok(DeviceInfo { source: self.source(), assemblies, app_domains, generation })
    }

    /// Full name of a type. Cached for the session.
    pub fn resolve_type(&self, index: u32, cancel: &CancelToken) -> Result<TypeInfo> {
        self.shared().types.type_info(index, || {
            let FixedName(name) =
                self.call(Command::RESOLVE_TYPE, &index, self.config().request_timeout(), cancel)?;
            Ok(TypeInfo { index, name })
        })
    }

    /// Name, declaring type and instance offset of a field. Cached for the session.
    pub fn resolve_field(&self, index: u32, cancel: &CancelToken) -> Result<FieldInfo> {
        self.shared().types.field_info(index, || {
            let reply: ResolvedField =
                self.call(Command::RESOLVE_FIELD, &index, self.config().request_timeout(), cancel)?;
            Ok(FieldInfo { index, declaring_type: reply.declaring_type, offset: reply.offset, name: reply.name })
        })
    }

    /// Name and declaring type of a method. Cached for the session.
    pub fn resolve_method(&self, index: u32, cancel: &CancelToken) -> Result<MethodInfo> {
        self.shared().types.method_info(index, || {
            let reply: ResolvedMethod =
                self.call(Command::RESOLVE_METHOD, &index, self.config().request_timeout(), cancel)?;
            Ok(MethodInfo { index, declaring_type: reply.declaring_type, name: reply.name })
        })
    }
}

struct FixedName(String);

impl Decode for FixedName {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.fixed_str(NAME_SIZE).map(Self)
    }
}

struct ResolvedField {
    declaring_type: u32,
    offset: u32,
    name: String,
}

impl Decode for ResolvedField {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { declaring_type: r.u32()?, offset: r.u32()?, name: r.fixed_str(NAME_SIZE)? })
    }
}

struct ResolvedMethod {
    declaring_type: u32,
    name: String,
}

impl Decode for ResolvedMethod {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { declaring_type: r.u32()?, name: r.fixed_str(NAME_SIZE)? })
    }
}
