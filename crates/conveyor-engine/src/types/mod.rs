//! Builtin task types.

mod branch;
mod collect;
mod command;
mod date_window;
mod file;
mod http;
mod launch;
mod paged;
mod solver;
mod template_string;

pub use branch::Conditional;
pub use collect::CollectValues;
pub use command::{Command, CommandEach};
pub use date_window::{DateWindow, Window, completed_window};
pub use file::{CopyFile, FileFormat, ListFiles, ReadFile, WriteFile};
pub use http::{Http, HttpKind};
pub use launch::{LaunchOperation, LaunchTask};
pub use paged::{GeneratePagedOperation, PagedBatch, generate_pages, page_count};
pub use solver::Solver;
pub use template_string::TemplateString;

use crate::registry::TaskTypeRegistry;

pub(crate) fn register_builtin(registry: &mut TaskTypeRegistry) {
  registry.register("Command", Command);
  registry.register("CommandEach", CommandEach);

  for (name, kind) in [
    ("RestRequest", HttpKind::RestRequest),
    ("GetJSON", HttpKind::GetJson),
    ("GetText", HttpKind::GetText),
    ("GetXML", HttpKind::GetXml),
    ("GetBinary", HttpKind::GetBinary),
    ("SendJSON", HttpKind::SendJson),
  ] {
    registry.register(name, Http::new(kind));
  }

  for (suffix, format) in [
    ("JSON", FileFormat::Json),
    ("Text", FileFormat::Text),
    ("XML", FileFormat::Xml),
    ("Binary", FileFormat::Binary),
  ] {
    registry.register(&format!("Read{}", suffix), ReadFile::new(format));
    registry.register(&format!("Write{}", suffix), WriteFile::new(format));
  }
  registry.register("ListFiles", ListFiles);
  registry.register("CopyFile", CopyFile);

  registry.register("Conditional", Conditional);
  registry.register("CollectValues", CollectValues);
  registry.register("DateWindow", DateWindow);
  registry.register("TemplateString", TemplateString);
  registry.register("Solver", Solver);
  registry.register("GeneratePagedOperation", GeneratePagedOperation);
  registry.register("LaunchTask", LaunchTask);
  registry.register("LaunchOperation", LaunchOperation);
}
