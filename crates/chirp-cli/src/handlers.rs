#![deny(clippy::all, clippy::pedantic)]

use chirp_api_types::{
    Author, CreatePostInput, GetPostByIdInput, GetPostsByUserIdInput, GetUserByUsernameInput,
    Post, PostWithAuthor, procedures,
};
use serde_json::Value;
use uuid::Uuid;

use crate::args::Commands;
use crate::client::{CliError, Ctx};
use crate::print::{print_json, print_plain};

pub async fn handle(ctx: &Ctx, cmd: Commands) -> Result<(), CliError> {
    match cmd {
        Commands::Feed { plain } => {
            let posts = feed(ctx).await?;
            output_posts(&posts, plain)
        }
        Commands::Show { id } => print_json(&show(ctx, id).await?),
        Commands::Create { content } => print_json(&create(ctx, content).await?),
        Commands::Profile { username } => print_json(&profile(ctx, &username).await?),
        Commands::UserPosts { user_id, plain } => {
            let posts = user_posts(ctx, user_id).await?;
            output_posts(&posts, plain)
        }
    }
}

fn output_posts(posts: &[PostWithAuthor], plain: bool) -> Result<(), CliError> {
    if plain {
        print_plain(posts);
        Ok(())
    } else {
        print_json(&posts)
    }
}

pub async fn feed(ctx: &Ctx) -> Result<Vec<PostWithAuthor>, CliError> {
    ctx.query::<Value, _>(procedures::POSTS_GET_ALL, None).await
}

pub async fn show(ctx: &Ctx, id: Uuid) -> Result<PostWithAuthor, CliError> {
    let input = GetPostByIdInput { id: id.to_string() };
    ctx.query(procedures::POSTS_GET_BY_ID, Some(&input)).await
}

pub async fn create(ctx: &Ctx, content: String) -> Result<Post, CliError> {
    ctx.mutate(procedures::POSTS_CREATE, &CreatePostInput { content })
        .await
}

pub async fn profile(ctx: &Ctx, username: &str) -> Result<Author, CliError> {
    let username = username.trim_start_matches('@').to_string();
    let input = GetUserByUsernameInput { username };
    ctx.query(procedures::PROFILE_GET_USER_BY_USERNAME, Some(&input))
        .await
}

pub async fn user_posts(ctx: &Ctx, user_id: String) -> Result<Vec<PostWithAuthor>, CliError> {
    let input = GetPostsByUserIdInput { user_id };
    ctx.query(procedures::POSTS_GET_BY_USER_ID, Some(&input))
        .await
}
