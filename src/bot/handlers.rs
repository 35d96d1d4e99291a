//! Обработчики: выдача ссылок, меню, поддержка и админские команды.

#[path = "handlers/callbacks/mod.rs"]
mod callbacks;
#[path = "handlers/commands/mod.rs"]
mod commands;
#[path = "handlers/format.rs"]
mod format;
#[path = "handlers/menu.rs"]
mod menu;
#[path = "handlers/shared.rs"]
mod shared;
#[path = "handlers/state.rs"]
mod state;
#[path = "handlers/support.rs"]
mod support;

pub use state::BotState;

use teloxide::dispatching::DpHandlerDescription;
use teloxide::dptree;
use teloxide::prelude::*;

pub fn schema() -> dptree::Handler<
    'static,
    Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>,
    DpHandlerDescription,
> {
    let private_handler = dptree::filter(|msg: Message| msg.chat.is_private())
        .branch(commands::handler())
        .endpoint(menu::handle_menu_buttons);

    let message_handler = Update::filter_message()
        .branch(dptree::filter(support::is_join_leave_notice).endpoint(support::delete_join_leave_notice))
        .branch(dptree::filter_map(support::staff_reply_filter).endpoint(support::relay_staff_reply))
        .branch(private_handler);

    dptree::entry()
        .branch(message_handler)
        .branch(callbacks::handler())
}
