// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Steps shared by the zone-updating procedures
//!
//! Most service classes update the same way: stash undo metadata, make
//! sure the image is local, point the registry at it, reprovision the
//! zone, and wait for the new zone to report the target image.  The
//! specialized procedures compose these with their own extra steps.

use slog::{debug, info};
use std::time::Duration;
use updateadm_clients::ServiceUpdate;
use updateadm_common::error::InternalError;
use updateadm_common::poll::{self, CondCheckError, PollError, PollPolicy};
use updateadm_types::{Image, Instance, NormalizedChange};
use uuid::Uuid;

use crate::context::ExecContext;
use crate::error::ExecError;

/// How long we give a reprovisioned zone to come back reporting the new
/// image.
const ZONE_SETTLE: PollPolicy =
    PollPolicy::new(Duration::from_secs(5), 60);

/// Make sure `image` is available in the local image store, importing it
/// from the upstream registry if it isn't.
pub(super) async fn ensure_image_local(
    ctx: &ExecContext<'_>,
    image: &Image,
) -> Result<(), ExecError> {
    match ctx.clients.image_store.get_image(image.uuid).await {
        Ok(_) => {
            debug!(ctx.log, "image already local"; "image" => %image.uuid);
            Ok(())
        }
        Err(error) if error.is_not_found() => {
            ctx.note(&format!(
                "Importing image {} ({}@{})",
                image.uuid, image.name, image.version
            ));
            ctx.clients.image_store.import_remote_image(image.uuid).await?;
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Write the instance's pre-update state into the work directory so an
/// operator can reconstruct it.
pub(super) fn save_instance_undo(
    ctx: &ExecContext<'_>,
    instance: &Instance,
) -> Result<(), ExecError> {
    let contents = serde_json::to_vec_pretty(instance).map_err(|source| {
        InternalError::Serialize {
            context: format!(
                "serializing undo metadata for {}",
                instance.instance_id
            ),
            source,
        }
    })?;
    let name = format!(
        "undo-{}-{}.json",
        instance.service_name, instance.instance_id
    );
    ctx.workdir.write_artifact(&name, &contents)?;
    Ok(())
}

/// Point the service registry's record for this service at the new image
/// (and new user-script, when one is being rolled).
pub(super) async fn refresh_service_record(
    ctx: &ExecContext<'_>,
    change: &NormalizedChange,
    image: &Image,
    user_script: Option<String>,
) -> Result<(), ExecError> {
    let Some(service_uuid) = change.service.uuid else {
        // synthetic services (e.g. assets) have no registry record
        debug!(
            ctx.log, "service has no registry record; skipping refresh";
            "service" => &change.service.name,
        );
        return Ok(());
    };
    ctx.clients
        .registry
        .update_service(
            service_uuid,
            &ServiceUpdate { image_uuid: Some(image.uuid), user_script },
        )
        .await?;
    Ok(())
}

/// Replace the zone with a fresh one from `image`, preserving identity.
pub(super) async fn reprovision_zone(
    ctx: &ExecContext<'_>,
    instance: &Instance,
    image: &Image,
) -> Result<(), ExecError> {
    ctx.note(&format!(
        "Reprovisioning {} ({})",
        instance.alias.as_deref().unwrap_or(&instance.instance_id),
        instance.service_name,
    ));
    let script = format!(
        "echo '{{\"image_uuid\": \"{}\"}}' | vmadm reprovision {}",
        image.uuid, instance.instance_id,
    );
    ctx.exec_checked(instance.server_id, &script).await?;
    Ok(())
}

/// Poll until the zone reports `image` as its current image.
pub(super) async fn wait_for_zone_image(
    ctx: &ExecContext<'_>,
    instance: &Instance,
    image: &Image,
) -> Result<(), ExecError> {
    let script = format!("vmadm get {} | json image_uuid", instance.instance_id);
    let server = instance.server_id;
    let result = poll::wait_for(ZONE_SETTLE, || async {
        match ctx.clients.shell.exec_on(server, &script).await {
            Ok(result)
                if result.success()
                    && result.stdout_trimmed()
                        == image.uuid.to_string() =>
            {
                Ok(())
            }
            Ok(_) => Err(CondCheckError::NotYet),
            Err(error) => Err(CondCheckError::Failed(error)),
        }
    })
    .await;
    match result {
        Ok(()) => {
            info!(
                ctx.log, "zone reports target image";
                "zone" => &instance.instance_id,
                "image" => %image.uuid,
            );
            Ok(())
        }
        Err(PollError::TimedOut { attempts, .. }) => Err(ExecError::Timeout {
            what: format!(
                "zone {} to report image {}",
                instance.instance_id, image.uuid
            ),
            attempts,
        }),
        Err(PollError::Permanent(error)) => {
            Err(ExecError::Upstream(error))
        }
    }
}

/// The standard update flow for a single zone.
pub(super) async fn update_zone(
    ctx: &ExecContext<'_>,
    change: &NormalizedChange,
    instance: &Instance,
    image: &Image,
) -> Result<(), ExecError> {
    save_instance_undo(ctx, instance)?;
    ensure_image_local(ctx, image).await?;
    refresh_service_record(ctx, change, image, None).await?;
    reprovision_zone(ctx, instance, image).await?;
    wait_for_zone_image(ctx, instance, image).await
}

/// The one update change this procedure was bound to, with its instances
/// and target image.  Single-service procedures use this to unpack their
/// input.
pub(super) fn single_change<'a>(
    changes: &'a [NormalizedChange],
    service: &str,
) -> Result<(&'a NormalizedChange, &'a Image), ExecError> {
    let [change] = changes else {
        return Err(ExecError::Precondition(format!(
            "expected exactly one \"{}\" change, found {}",
            service,
            changes.len()
        )));
    };
    let Some(image) = &change.image else {
        return Err(ExecError::Precondition(format!(
            "\"{}\" change has no resolved image",
            service
        )));
    };
    Ok((change, image))
}

/// The instances a change applies to: the one it names, or every instance
/// of its service.
pub(super) fn affected_instances<'a>(
    ctx: &ExecContext<'a>,
    change: &'a NormalizedChange,
) -> Vec<&'a Instance> {
    match &change.instance {
        Some(instance) => vec![instance],
        None => ctx.inventory.instances_of(&change.service.name).collect(),
    }
}

/// Resolve the zone of `service` expected to be the only one, by way of
/// the inventory.
pub(super) fn the_one_zone_of<'a>(
    ctx: &ExecContext<'a>,
    service: &'a str,
) -> Result<&'a Instance, ExecError> {
    let mut instances = ctx.inventory.instances_of(service);
    let first = instances.next().ok_or_else(|| {
        ExecError::Precondition(format!("no \"{}\" zone found", service))
    })?;
    if instances.next().is_some() {
        return Err(ExecError::Precondition(format!(
            "more than one \"{}\" zone found",
            service
        )));
    }
    Ok(first)
}

/// Dedup a procedure's changes down to the distinct images they target.
pub(super) fn distinct_images(
    changes: &[NormalizedChange],
) -> Vec<&Image> {
    let mut seen: Vec<Uuid> = Vec::new();
    let mut images = Vec::new();
    for change in changes {
        if let Some(image) = &change.image {
            if !seen.contains(&image.uuid) {
                seen.push(image.uuid);
                images.push(image);
            }
        }
    }
    images
}
