//! Fixed phrase tables used by query analysis.

use crate::types::Intent;

/// Phrases per intent, scanned as case-insensitive substrings.
pub const INTENT_PHRASES: &[(Intent, &[&str])] = &[
   (Intent::Implementation, &[
      "how to implement",
      "how to build",
      "how do i",
      "implementation",
      "code for",
      "code example",
      "tutorial",
      "como implementar",
      "como fazer",
      "implementação",
      "código para",
   ]),
   (Intent::Documentation, &[
      "documentation",
      "docs",
      "reference",
      "api",
      "properties",
      "parameters",
      "props",
      "documentação",
      "referência",
      "propriedades",
      "parâmetros",
   ]),
   (Intent::Example, &["example", "sample", "demo", "showcase", "template", "exemplo"]),
   (Intent::Troubleshooting, &[
      "error",
      "problem",
      "bug",
      "not working",
      "doesn't work",
      "fix",
      "solution",
      "erro",
      "problema",
      "não funciona",
      "solução",
   ]),
];

pub const STACK_KEYWORDS: &[(&str, &[&str])] = &[
   ("nextjs", &["next.js", "nextjs", "next", "app router", "pages router"]),
   ("react", &["react", "jsx", "tsx", "component", "hook", "state"]),
   ("tailwind", &["tailwind", "css", "styling", "classes", "responsive"]),
   ("shadcn", &["shadcn", "shadcn/ui", "radix", "ui components"]),
   ("prisma", &["prisma", "orm", "database", "schema", "migration"]),
   ("auth", &["auth", "authentication", "login", "oauth", "jwt", "session"]),
];

pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
   ("ui_components", &["component", "button", "form", "input", "dialog", "modal"]),
   ("routing", &["route", "navigation", "link", "redirect", "middleware"]),
   ("data_fetching", &["fetch", "api", "swr", "query", "mutation", "cache"]),
   ("styling", &["css", "style", "theme", "design", "layout", "responsive"]),
   ("authentication", &["auth", "login", "user", "session", "permission"]),
   ("database", &["database", "sql", "query", "model", "schema", "migration"]),
];

/// Synonyms added for a detected hint when any trigger word appears in the
/// query. An empty trigger list always fires.
pub struct Expansion {
   pub hint:     &'static str,
   pub triggers: &'static [&'static str],
   pub terms:    &'static [&'static str],
}

pub const STACK_EXPANSIONS: &[Expansion] = &[
   Expansion {
      hint:     "nextjs",
      triggers: &["component"],
      terms:    &["server component", "client component", "page component"],
   },
   Expansion {
      hint:     "nextjs",
      triggers: &["route"],
      terms:    &["app router", "api route", "dynamic route"],
   },
   Expansion {
      hint:     "react",
      triggers: &["state"],
      terms:    &["useState", "useEffect", "useContext"],
   },
   Expansion {
      hint:     "react",
      triggers: &["component"],
      terms:    &["functional component", "jsx", "props"],
   },
   Expansion {
      hint:     "tailwind",
      triggers: &["style", "css"],
      terms:    &["utility classes", "responsive design", "dark mode"],
   },
   Expansion {
      hint:     "shadcn",
      triggers: &["component"],
      terms:    &["radix ui", "accessible", "customizable"],
   },
];

pub const CATEGORY_EXPANSIONS: &[Expansion] = &[
   Expansion {
      hint:     "ui_components",
      triggers: &[],
      terms:    &["accessibility", "props", "styling", "variants"],
   },
   Expansion {
      hint:     "routing",
      triggers: &[],
      terms:    &["navigation", "params", "query string", "middleware"],
   },
   Expansion {
      hint:     "data_fetching",
      triggers: &[],
      terms:    &["loading", "error handling", "caching", "revalidation"],
   },
];
