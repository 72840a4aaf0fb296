//! Project registry commands.

use std::io::Write;

use anyhow::{Context, Result};
use wt_core::{ProjectId, ProjectRef, TenantId};
use wt_db::SqliteStore;

use super::util::write_json;

pub fn add<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    tenant: &TenantId,
    id: &ProjectId,
    title: &str,
    json: bool,
) -> Result<()> {
    let project = ProjectRef {
        project_id: id.clone(),
        tenant_id: tenant.clone(),
        title: title.to_string(),
    };
    store
        .upsert_project(&project)
        .with_context(|| format!("failed to save project {id}"))?;
    tracing::info!(project_id = %id, tenant_id = %tenant, "project saved");

    if json {
        return write_json(writer, &project);
    }
    writeln!(writer, "Saved project {id} ({title}) for tenant {tenant}")?;
    Ok(())
}

pub fn list<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    tenant: &TenantId,
    json: bool,
) -> Result<()> {
    let projects = store
        .list_projects(tenant)
        .context("failed to list projects")?;
    if json {
        return write_json(writer, &projects);
    }
    if projects.is_empty() {
        writeln!(writer, "No projects for tenant {tenant}.")?;
        return Ok(());
    }
    for project in projects {
        writeln!(writer, "- {}: {}", project.project_id, project.title)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn add_then_list_projects() {
        let store = SqliteStore::open_in_memory().unwrap();
        let acme = TenantId::new("acme").unwrap();

        let mut output = Vec::new();
        add(
            &mut output,
            &store,
            &acme,
            &ProjectId::new("gemini").unwrap(),
            "Gemini",
            false,
        )
        .unwrap();
        add(
            &mut output,
            &store,
            &acme,
            &ProjectId::new("apollo").unwrap(),
            "Apollo",
            false,
        )
        .unwrap();
        list(&mut output, &store, &acme, false).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Saved project gemini (Gemini) for tenant acme
        Saved project apollo (Apollo) for tenant acme
        - apollo: Apollo
        - gemini: Gemini
        ");
    }

    #[test]
    fn list_is_scoped_to_tenant() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut output = Vec::new();
        add(
            &mut output,
            &store,
            &TenantId::new("acme").unwrap(),
            &ProjectId::new("apollo").unwrap(),
            "Apollo",
            false,
        )
        .unwrap();

        let mut listed = Vec::new();
        list(&mut listed, &store, &TenantId::new("globex").unwrap(), false).unwrap();
        assert_snapshot!(String::from_utf8(listed).unwrap(), @"No projects for tenant globex.");
    }
}
