//! Apply command implementation

use anyhow::Result;
use appstage_core::ApplyOptions;
use appstage_ipc::{Request, Response};

use super::{absolute_path, dry_run_prefix, request, unexpected};
use crate::cli::ApplyArgs;
use crate::output::{is_json_mode, print_apply, print_success};

pub async fn execute(args: ApplyArgs) -> Result<()> {
    let apply_path = absolute_path(&args.path)?;
    let options = ApplyOptions {
        approve: args.approve,
        dry_run: args.dry_run,
        promote: args.promote,
        reload: args.reload,
        branch: args.branch,
        commit: args.commit,
        git_auth: args.git_auth,
        clobber: args.clobber,
        force_reload: args.force_reload,
    };

    let response = request(Request::Apply {
        apply_path: apply_path.clone(),
        glob: args.glob,
        options,
    })
    .await?;

    match response {
        Response::Applied(applied) => {
            if !is_json_mode() {
                print_success(&format!(
                    "{}Applied {}: {} created, {} updated",
                    dry_run_prefix(applied.dry_run),
                    apply_path,
                    applied.create_results.len(),
                    applied.update_results.len()
                ));
            }
            print_apply(&applied);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}
