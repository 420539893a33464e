use thiserror::Error;

// Order as served by the first menu; later additions are appended.
const DEFAULT_DRINKS: [&str; 14] = [
    "0% Guinness",
    "0% Peroni",
    "Camden Hells",
    "Champagne",
    "Coke",
    "Gin & Tonic",
    "Koppaberg",
    "Lemonade",
    "Nightcap",
    "Peroni",
    "Tango Orange",
    "Tea",
    "Water",
    "White Wine",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MenuError {
    #[error("Drink name is required")]
    Empty,

    #[error("Drink already exists")]
    Duplicate(String),

    #[error("Drink not found")]
    Missing(String),
}

/// The drinks currently on offer. Lives for the lifetime of the process and is
/// rebuilt from the defaults on every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrinkMenu {
    drinks: Vec<String>,
}

impl Default for DrinkMenu {
    fn default() -> Self {
        DrinkMenu {
            drinks: DEFAULT_DRINKS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl DrinkMenu {
    pub fn drinks(&self) -> Vec<String> {
        self.drinks.clone()
    }

    pub fn contains(&self, drink: &str) -> bool {
        self.drinks.iter().any(|d| d == drink)
    }

    pub fn add(&mut self, drink: &str) -> Result<Vec<String>, MenuError> {
        let drink = drink.trim();
        if drink.is_empty() {
            return Err(MenuError::Empty);
        }
        if self.contains(drink) {
            return Err(MenuError::Duplicate(drink.to_string()));
        }
        self.drinks.push(drink.to_string());
        Ok(self.drinks())
    }

    pub fn remove(&mut self, drink: &str) -> Result<Vec<String>, MenuError> {
        let index = self
            .drinks
            .iter()
            .position(|d| d == drink)
            .ok_or_else(|| MenuError::Missing(drink.to_string()))?;
        self.drinks.remove(index);
        Ok(self.drinks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_defaults() {
        let menu = DrinkMenu::default();
        assert_eq!(menu.drinks().len(), DEFAULT_DRINKS.len());
        assert!(menu.contains("Gin & Tonic"));
        assert!(!menu.contains("gin & tonic"));
    }

    #[test]
    fn add_appends_trimmed_name_and_returns_full_menu() {
        let mut menu = DrinkMenu::default();
        let drinks = menu.add("  Espresso Martini ").unwrap();
        assert_eq!(drinks.len(), DEFAULT_DRINKS.len() + 1);
        assert_eq!(drinks.last().map(String::as_str), Some("Espresso Martini"));
        assert_eq!(drinks, menu.drinks());
    }

    #[test]
    fn add_rejects_duplicates_and_blank_names() {
        let mut menu = DrinkMenu::default();
        assert_eq!(
            menu.add(" Tea "),
            Err(MenuError::Duplicate(String::from("Tea")))
        );
        assert_eq!(menu.add("   "), Err(MenuError::Empty));
        assert_eq!(menu.drinks().len(), DEFAULT_DRINKS.len());
    }

    #[test]
    fn duplicate_check_is_case_sensitive() {
        let mut menu = DrinkMenu::default();
        assert!(menu.add("tea").is_ok());
    }

    #[test]
    fn remove_takes_exact_name_only() {
        let mut menu = DrinkMenu::default();
        assert_eq!(
            menu.remove("coke"),
            Err(MenuError::Missing(String::from("coke")))
        );
        let drinks = menu.remove("Coke").unwrap();
        assert!(!drinks.contains(&String::from("Coke")));
        assert_eq!(drinks.len(), DEFAULT_DRINKS.len() - 1);
        assert!(menu.remove("Coke").is_err());
    }
}
