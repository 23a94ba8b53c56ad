//! Command-line subcommands and their handlers.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::any::Any;
use std::io::{self, BufRead, Write};

use mangashelf::api::types::{
  CatalogPage, CollectionItem, CollectionStatus, Credentials, Manga, NewUser, NewsItem, User,
};
use mangashelf::api::MangaClient;
use mangashelf::listing::{apply, FilterSortParams, SortKey, StatusCounts, StatusFilter};
use mangashelf::query::CacheEntry;

const PASSWORD_ENV: &str = "MANGASHELF_PASSWORD";

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in and remember the credential
  Login {
    /// Account email
    username: String,
    /// Password (default: $MANGASHELF_PASSWORD, then prompt)
    #[arg(long)]
    password: Option<String>,
  },
  /// Create an account
  Signup {
    name: String,
    email: String,
    #[arg(long)]
    password: Option<String>,
  },
  /// Forget the stored credential
  Logout,
  /// Show the signed-in user
  Whoami,
  /// Search titles
  Search { query: String },
  /// Top-ranked titles
  Top {
    /// Upstream category (e.g. "bypopularity", "favorite")
    #[arg(long)]
    filter: Option<String>,
    #[command(flatten)]
    listing: ListingArgs,
  },
  /// Recommended titles
  Recommended {
    #[command(flatten)]
    listing: ListingArgs,
  },
  /// Titles in a genre
  Genre {
    id: u64,
    #[command(flatten)]
    listing: ListingArgs,
  },
  /// Show one title
  Show { id: u64 },
  /// Latest news
  News,
  /// Browse the catalog page by page
  Catalog {
    #[arg(long, default_value_t = 1)]
    page: u32,
    /// Server-side genre filter
    #[arg(long = "server-genre")]
    server_genre: Option<String>,
    #[command(flatten)]
    listing: ListingArgs,
  },
  /// Your saved titles
  Collection {
    /// all, reading, completed or planned
    #[arg(long, default_value = "all")]
    status: StatusFilter,
    #[arg(long, default_value = "title")]
    sort: String,
  },
  /// Save a title to your collection
  Add { id: u64 },
  /// Change the reading status of a saved title
  SetStatus { id: u64, status: CollectionStatus },
  /// Remove a title from your collection
  Remove { id: u64 },
}

/// Client-side filtering and sorting of a fetched list.
#[derive(clap::Args, Debug, Default)]
pub struct ListingArgs {
  /// Keep titles tagged with this genre (case-insensitive)
  #[arg(long)]
  genre: Option<String>,
  /// Keep titles with this publication status (case-insensitive)
  #[arg(long)]
  status: Option<String>,
  /// title, year, rating, author or popularity
  #[arg(long, default_value = "popularity")]
  sort: String,
}

impl ListingArgs {
  fn params(&self) -> FilterSortParams {
    let mut params = FilterSortParams::new().sort_by(SortKey::from(self.sort.as_str()));
    if let Some(genre) = &self.genre {
      params = params.genre(genre.clone());
    }
    if let Some(status) = &self.status {
      params = params.status(status.clone());
    }
    params
  }
}

pub async fn run(command: Command, client: &MangaClient) -> Result<()> {
  match command {
    Command::Login { username, password } => {
      let password = resolve_password(password)?;
      client
        .login(&Credentials {
          username: username.clone(),
          password,
        })
        .await?;
      println!("Logged in as {}", username);
    }
    Command::Signup {
      name,
      email,
      password,
    } => {
      let password = resolve_password(password)?;
      let user = client
        .signup(&NewUser {
          name,
          email,
          password,
        })
        .await?;
      println!("Created account #{} for {}", user.id, user.email);
    }
    Command::Logout => {
      client.logout()?;
      println!("Logged out");
    }
    Command::Whoami => {
      let entry = client.current_user().await;
      match loaded::<User>(&entry)? {
        Some(user) => println!("{} <{}> (#{})", user.name, user.email, user.id),
        None => println!("Not logged in"),
      }
    }
    Command::Search { query } => {
      let entry = client.search(&query).await;
      let params = FilterSortParams::new().sort_by(SortKey::Unordered);
      print_list(loaded::<Vec<Manga>>(&entry)?, &params);
    }
    Command::Top { filter, listing } => {
      let entry = client.top(filter.as_deref()).await;
      print_list(loaded::<Vec<Manga>>(&entry)?, &listing.params());
    }
    Command::Recommended { listing } => {
      let entry = client.recommended().await;
      print_list(loaded::<Vec<Manga>>(&entry)?, &listing.params());
    }
    Command::Genre { id, listing } => {
      let entry = client.by_genre(id).await;
      print_list(loaded::<Vec<Manga>>(&entry)?, &listing.params());
    }
    Command::Show { id } => {
      let entry = client.details(Some(id)).await;
      if let Some(manga) = loaded::<Manga>(&entry)? {
        print_details(manga);
      }
    }
    Command::News => {
      let entry = client.news().await;
      for item in loaded::<Vec<NewsItem>>(&entry)?.into_iter().flatten() {
        println!("{}", item.title);
        if let Some(date) = &item.date {
          println!("  {}", date);
        }
        if let Some(url) = &item.url {
          println!("  {}", url);
        }
      }
    }
    Command::Catalog {
      page,
      server_genre,
      listing,
    } => {
      let mut pages = client.catalog_paginator(server_genre);
      pages.go_to(page);
      let result = pages
        .settled()
        .await
        .ok_or_else(|| eyre!("Catalog page {} did not load", page))?;
      if let Some(catalog) = loaded::<CatalogPage>(&result.entry)? {
        print_list(Some(&catalog.mangas), &listing.params());
        let more = if catalog.has_next_page() { ", more available" } else { "" };
        println!("-- page {}{} --", pages.page(), more);
      }
    }
    Command::Collection { status, sort } => {
      let entry = client.collection().await;
      let Some(items) = loaded::<Vec<CollectionItem>>(&entry)? else {
        println!("Not logged in");
        return Ok(());
      };
      let counts = StatusCounts::from_items(items);
      for item in status.view(items, SortKey::from(sort.as_str())) {
        println!("{:>7}  {:<10} {}", item.mal_id, item.status.as_str(), item.title);
      }
      println!(
        "-- all {} | reading {} | completed {} | planned {} --",
        counts.all(),
        counts.reading,
        counts.completed,
        counts.planned
      );
    }
    Command::Add { id } => {
      client.add_to_collection(id).await?;
      println!("Added #{} to your collection", id);
    }
    Command::SetStatus { id, status } => {
      client.update_status(id, status).await?;
      println!("Marked #{} as {}", id, status);
    }
    Command::Remove { id } => {
      client.remove_from_collection(id).await?;
      println!("Removed #{} from your collection", id);
    }
  }

  Ok(())
}

/// Data of a settled entry. An error with retained data is shown as a
/// warning; an error without data fails the command.
fn loaded<T: Any>(entry: &CacheEntry) -> Result<Option<&T>> {
  match (&entry.error, entry.data::<T>()) {
    (Some(err), None) => Err(eyre!("{}", err)),
    (Some(err), Some(data)) => {
      eprintln!("warning: showing cached data, refresh failed: {}", err);
      Ok(Some(data))
    }
    (None, data) => Ok(data),
  }
}

fn print_list(items: Option<&Vec<Manga>>, params: &FilterSortParams) {
  let Some(items) = items else {
    return;
  };
  for manga in apply(items, params) {
    let year = manga.year.map(|y| y.to_string()).unwrap_or_else(|| "----".to_string());
    let rating = manga
      .rating
      .map(|r| format!("{:.2}", r))
      .unwrap_or_else(|| "-".to_string());
    println!("{:>7}  {}  {:>5}  {}", manga.mal_id, year, rating, manga.title);
  }
}

fn print_details(manga: &Manga) {
  println!("{} (#{})", manga.title, manga.mal_id);
  if let Some(alt) = &manga.alternative_title {
    println!("  also: {}", alt);
  }
  if let Some(author) = &manga.author {
    println!("  author: {}", author);
  }
  if let Some(year) = manga.year {
    println!("  year: {}", year);
  }
  if let Some(status) = &manga.status {
    println!("  status: {}", status);
  }
  if let Some(rating) = manga.rating {
    println!("  rating: {:.2}", rating);
  }
  if !manga.tags.is_empty() {
    println!("  tags: {}", manga.tags.join(", "));
  }
  if let Some(description) = &manga.description {
    println!();
    println!("{}", description);
  }
}

fn resolve_password(password: Option<String>) -> Result<String> {
  if let Some(password) = password.or_else(|| std::env::var(PASSWORD_ENV).ok()) {
    return Ok(password);
  }

  print!("Password: ");
  io::stdout()
    .flush()
    .map_err(|e| eyre!("Failed to write prompt: {}", e))?;
  let mut line = String::new();
  io::stdin()
    .lock()
    .read_line(&mut line)
    .map_err(|e| eyre!("Failed to read password: {}", e))?;
  let password = line.trim_end_matches(['\r', '\n']).to_string();
  if password.is_empty() {
    return Err(eyre!("No password given"));
  }
  Ok(password)
}
