use std::path::Path;

use crate::users::change_user_name;

use super::{find_user, load_state};

pub fn run_user_rename(config: &Path, name: &str, new_name: &str) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let user = find_user(&state, name)?;
    let renamed = change_user_name(&state, &user, new_name)?;
    println!("Renamed user \"{}\" to \"{}\"", user.name, renamed.name);
    Ok(())
}
