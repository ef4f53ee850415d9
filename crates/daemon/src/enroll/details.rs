use common::retry;
use common::version::build_info;

use crate::querier::{QueryError, Querier};
use crate::server::{EnrollmentDetails, Row};

use super::{EnrollError, EnrollOptions};

pub const FINGERPRINT_QUERY: &str = "SELECT osquery_info.version as osquery_version,
       os_version.build as os_build,
       os_version.name as os_name,
       os_version.platform as os_platform,
       os_version.platform_like as os_platform_like,
       os_version.version as os_version,
       system_info.hardware_model,
       system_info.hardware_serial,
       system_info.hardware_vendor,
       system_info.hostname,
       system_info.uuid as hardware_uuid
FROM os_version, system_info, osquery_info;";

/// Best-effort host facts for enrollment. A failed query only aborts
/// enrollment when details are required.
pub(super) async fn collect(
    querier: Option<&dyn Querier>,
    options: &EnrollOptions,
) -> Result<EnrollmentDetails, EnrollError> {
    let queried = if options.skip_details {
        Err(QueryError::Skipped.to_string())
    } else {
        retry::wait_for(
            || query_details(querier),
            options.details_timeout,
            options.details_interval,
        )
        .await
        .map_err(|e| e.to_string())
    };

    let mut details = match queried {
        Ok(details) => details,
        Err(e) if options.details_required => return Err(EnrollError::Details(e)),
        Err(e) => {
            tracing::warn!(error = %e, "could not collect enrollment details, enrolling without them");
            EnrollmentDetails::default()
        }
    };

    details.agent_version = build_info().version.to_string();
    details.os_family = std::env::consts::OS.to_string();
    details.architecture = std::env::consts::ARCH.to_string();
    Ok(details)
}

async fn query_details(querier: Option<&dyn Querier>) -> Result<EnrollmentDetails, QueryError> {
    let querier = querier.ok_or(QueryError::NoQuerier)?;
    let rows = querier.query(FINGERPRINT_QUERY).await?;
    let row = rows.into_iter().next().ok_or(QueryError::NoRows)?;
    Ok(from_row(&row))
}

fn from_row(row: &Row) -> EnrollmentDetails {
    let field = |name: &str| row.get(name).cloned().unwrap_or_default();
    EnrollmentDetails {
        os_version: field("os_version"),
        os_build: field("os_build"),
        os_name: field("os_name"),
        os_platform: field("os_platform"),
        os_platform_like: field("os_platform_like"),
        osquery_version: field("osquery_version"),
        hardware_model: field("hardware_model"),
        hardware_serial: field("hardware_serial"),
        hardware_vendor: field("hardware_vendor"),
        hostname: field("hostname"),
        hardware_uuid: field("hardware_uuid"),
        ..Default::default()
    }
}
