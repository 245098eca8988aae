//! Tag command handlers.

use tabled::Tabled;

use eclusa_core::{Tag, TagValueEvent, tags_from_snapshot};

use crate::cli::{GlobalOpts, TagsArgs, TagsCommand};
use crate::error::CliError;
use crate::output;

use super::util::{self, Session};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct TagRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Type")]
    data_type: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Read at")]
    read_at: String,
}

impl From<&Tag> for TagRow {
    fn from(t: &Tag) -> Self {
        Self {
            id: t.id.to_string(),
            name: t.name.clone(),
            address: output::cell(t.address.as_deref()),
            data_type: t.data_type.to_string(),
            value: output::cell(t.value.as_ref()),
            read_at: output::cell(t.read_at.as_ref().map(|ts| ts.as_str())),
        }
    }
}

fn reading_detail(r: &TagValueEvent) -> String {
    match r.timestamp {
        Some(ref ts) => format!("tag {}: {} (read {})", r.tag_id, r.value, ts.as_str()),
        None => format!("tag {}: {}", r.tag_id, r.value),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    session: &Session,
    args: TagsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        TagsCommand::List { plc } => {
            let tags = tags_from_snapshot(session.api.list_tags(plc.get()).await?);
            let out = output::render_list(
                global.output,
                &tags,
                |t| TagRow::from(t),
                |t| t.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        TagsCommand::Read { tag } => {
            let reading = TagValueEvent::try_from(session.api.read_tag_value(tag.get()).await?)?;
            let out = output::render_single(global.output, &reading, reading_detail, |r| {
                r.value.to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        TagsCommand::Write {
            tag,
            value,
            data_type,
        } => {
            let value = util::parse_tag_value(&value, data_type)?;
            session
                .api
                .write_tag_value(tag.get(), &value.to_json())
                .await?;
            if !global.quiet {
                eprintln!("Wrote {value} to tag {tag}");
            }
            Ok(())
        }
    }
}
