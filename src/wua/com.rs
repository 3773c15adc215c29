//! COM implementation of the update agent

use windows::core::{Interface, BSTR, VARIANT};
use windows::Win32::System::UpdateAgent::{
    ISystemInformation, IUpdateService, IUpdateService2, IUpdateSession, IUpdateSession3,
    IUpdateServiceManager2, IWindowsUpdateAgentInfo, SystemInformation, UpdateSession,
    WindowsUpdateAgentInfo,
};

use super::{
    ole_date_to_utc, AddServiceRequest, AgentVersion, HistoryEntry, ServiceInfo, UpdateAgent,
    UpdateAgentProvider, CLIENT_APPLICATION_ID,
};
use crate::com::{bstr_variant, com_error, create_on};
use crate::security::Host;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ComUpdateAgentProvider;

impl ComUpdateAgentProvider {
    pub fn new() -> Self {
        ComUpdateAgentProvider
    }
}

impl UpdateAgentProvider for ComUpdateAgentProvider {
    fn connect(&self, host: &Host, is_local: bool) -> Result<Box<dyn UpdateAgent>> {
        let session: IUpdateSession = create_on(&UpdateSession, host, is_local, "Microsoft.Update.Session")?;
        unsafe { session.SetClientApplicationID(&BSTR::from(CLIENT_APPLICATION_ID)) }
            .map_err(|e| com_error(e, "IUpdateSession::SetClientApplicationID"))?;

        tracing::debug!(host = %host, "Update session created");
        Ok(Box::new(ComUpdateAgent {
            host: host.clone(),
            is_local,
            session,
        }))
    }
}

struct ComUpdateAgent {
    host: Host,
    is_local: bool,
    session: IUpdateSession,
}

impl ComUpdateAgent {
    fn service_manager(&self) -> Result<IUpdateServiceManager2> {
        let session: IUpdateSession3 = self
            .session
            .cast()
            .map_err(|e| com_error(e, "IUpdateSession3"))?;
        let manager = unsafe { session.CreateUpdateServiceManager() }
            .map_err(|e| com_error(e, "IUpdateSession3::CreateUpdateServiceManager"))?;
        unsafe { manager.SetClientApplicationID(&BSTR::from(CLIENT_APPLICATION_ID)) }
            .map_err(|e| com_error(e, "IUpdateServiceManager2::SetClientApplicationID"))?;
        Ok(manager)
    }
}

fn variant_i32(value: &VARIANT, context: &str) -> Result<i32> {
    i32::try_from(value).map_err(|e| com_error(e, context))
}

fn service_info(service: &IUpdateService) -> Result<ServiceInfo> {
    unsafe {
        let is_default_au_service = match service.cast::<IUpdateService2>() {
            Ok(service2) => service2
                .IsDefaultAUService()
                .map(|v| v.0 != 0)
                .unwrap_or(false),
            Err(_) => false,
        };

        Ok(ServiceInfo {
            service_id: service
                .ServiceID()
                .map_err(|e| com_error(e, "IUpdateService::ServiceID"))?
                .to_string(),
            name: service
                .Name()
                .map_err(|e| com_error(e, "IUpdateService::Name"))?
                .to_string(),
            is_managed: service.IsManaged().map(|v| v.0 != 0).unwrap_or(false),
            is_registered_with_au: service.IsRegisteredWithAU().map(|v| v.0 != 0).unwrap_or(false),
            is_default_au_service,
            offers_windows_updates: service.OffersWindowsUpdates().map(|v| v.0 != 0).unwrap_or(false),
            is_scan_package_service: service.IsScanPackageService().map(|v| v.0 != 0).unwrap_or(false),
        })
    }
}

impl UpdateAgent for ComUpdateAgent {
    fn api_version(&self) -> Result<AgentVersion> {
        let info: IWindowsUpdateAgentInfo = create_on(
            &WindowsUpdateAgentInfo,
            &self.host,
            self.is_local,
            "Microsoft.Update.AgentInfo",
        )?;

        unsafe {
            let major = info
                .GetInfo(&bstr_variant("ApiMajorVersion"))
                .map_err(|e| com_error(e, "GetInfo(ApiMajorVersion)"))?;
            let minor = info
                .GetInfo(&bstr_variant("ApiMinorVersion"))
                .map_err(|e| com_error(e, "GetInfo(ApiMinorVersion)"))?;
            let product = info
                .GetInfo(&bstr_variant("ProductVersionString"))
                .map_err(|e| com_error(e, "GetInfo(ProductVersionString)"))?;

            Ok(AgentVersion {
                api_major: variant_i32(&major, "ApiMajorVersion")?,
                api_minor: variant_i32(&minor, "ApiMinorVersion")?,
                product_version: BSTR::try_from(&product)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            })
        }
    }

    fn installer_is_busy(&self) -> Result<bool> {
        unsafe {
            let installer = self
                .session
                .CreateUpdateInstaller()
                .map_err(|e| com_error(e, "IUpdateSession::CreateUpdateInstaller"))?;
            let busy = installer
                .IsBusy()
                .map_err(|e| com_error(e, "IUpdateInstaller::IsBusy"))?;
            Ok(busy.0 != 0)
        }
    }

    fn reboot_required(&self) -> Result<bool> {
        let info: ISystemInformation = create_on(
            &SystemInformation,
            &self.host,
            self.is_local,
            "Microsoft.Update.SystemInfo",
        )?;
        let required = unsafe { info.RebootRequired() }
            .map_err(|e| com_error(e, "ISystemInformation::RebootRequired"))?;
        Ok(required.0 != 0)
    }

    fn history_count(&self) -> Result<usize> {
        unsafe {
            let searcher = self
                .session
                .CreateUpdateSearcher()
                .map_err(|e| com_error(e, "IUpdateSession::CreateUpdateSearcher"))?;
            let count = searcher
                .GetTotalHistoryCount()
                .map_err(|e| com_error(e, "IUpdateSearcher::GetTotalHistoryCount"))?;
            Ok(count.max(0) as usize)
        }
    }

    fn query_history(&self, start: usize, count: usize) -> Result<Vec<HistoryEntry>> {
        unsafe {
            let searcher = self
                .session
                .CreateUpdateSearcher()
                .map_err(|e| com_error(e, "IUpdateSession::CreateUpdateSearcher"))?;
            let collection = searcher
                .QueryHistory(start as i32, count as i32)
                .map_err(|e| com_error(e, "IUpdateSearcher::QueryHistory"))?;
            let len = collection
                .Count()
                .map_err(|e| com_error(e, "IUpdateHistoryEntryCollection::Count"))?;

            let mut entries = Vec::with_capacity(len.max(0) as usize);
            for index in 0..len {
                let item = collection
                    .get_Item(index)
                    .map_err(|e| com_error(e, "IUpdateHistoryEntryCollection::Item"))?;

                let (update_id, revision) = match item.UpdateIdentity() {
                    Ok(identity) => (
                        identity.UpdateID().map(|s| s.to_string()).unwrap_or_default(),
                        identity.RevisionNumber().unwrap_or_default(),
                    ),
                    Err(_) => (String::new(), 0),
                };

                entries.push(HistoryEntry {
                    date: item.Date().ok().and_then(ole_date_to_utc),
                    operation: item.Operation().map(|op| op.0).unwrap_or_default(),
                    result_code: item.ResultCode().map(|rc| rc.0).unwrap_or_default(),
                    hresult: item.HResult().unwrap_or_default(),
                    title: item.Title().map(|s| s.to_string()).unwrap_or_default(),
                    description: item.Description().map(|s| s.to_string()).unwrap_or_default(),
                    client_application_id: item
                        .ClientApplicationID()
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                    update_id,
                    revision,
                    service_id: item.ServiceID().map(|s| s.to_string()).unwrap_or_default(),
                    support_url: item.SupportUrl().map(|s| s.to_string()).unwrap_or_default(),
                });
            }
            Ok(entries)
        }
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        let manager = self.service_manager()?;
        unsafe {
            let services = manager
                .Services()
                .map_err(|e| com_error(e, "IUpdateServiceManager::Services"))?;
            let count = services
                .Count()
                .map_err(|e| com_error(e, "IUpdateServiceCollection::Count"))?;

            let mut out = Vec::with_capacity(count.max(0) as usize);
            for index in 0..count {
                let service = services
                    .get_Item(index)
                    .map_err(|e| com_error(e, "IUpdateServiceCollection::Item"))?;
                out.push(service_info(&service)?);
            }
            Ok(out)
        }
    }

    fn add_service(&self, request: &AddServiceRequest) -> Result<ServiceInfo> {
        let manager = self.service_manager()?;
        unsafe {
            match request {
                AddServiceRequest::ServiceId {
                    id,
                    flags,
                    authorization_cab,
                } => {
                    let registration = manager
                        .AddService2(
                            &BSTR::from(id.as_str()),
                            flags.bits(),
                            &BSTR::from(authorization_cab.as_deref().unwrap_or("")),
                        )
                        .map_err(|e| com_error(e, "IUpdateServiceManager2::AddService2"))?;
                    let service = registration
                        .Service()
                        .map_err(|e| com_error(e, "IUpdateServiceRegistration::Service"))?;
                    service_info(&service.cast::<IUpdateService>().map_err(|e| com_error(e, "IUpdateService"))?)
                }
                AddServiceRequest::ScanPackage { name, location } => {
                    let service = manager
                        .AddScanPackageService(&BSTR::from(name.as_str()), &BSTR::from(location.as_str()), 0)
                        .map_err(|e| com_error(e, "IUpdateServiceManager::AddScanPackageService"))?;
                    service_info(&service)
                }
            }
        }
    }

    fn remove_service(&self, service_id: &str) -> Result<()> {
        if service_id.is_empty() {
            return Err(Error::Operation("service id cannot be empty".into()));
        }
        let manager = self.service_manager()?;
        unsafe { manager.RemoveService(&BSTR::from(service_id)) }
            .map_err(|e| com_error(e, "IUpdateServiceManager::RemoveService"))
    }
}
