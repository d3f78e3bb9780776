use super::schema::VisionResult;

const RESPONSE_SCHEMA: &str = r#"{
  "analysis_status": "success|partial|failed",
  "confidence_overall": 0.85,
  "main_food": {
    "name": "main dish name (e.g., Nasi Goreng)",
    "description": "detailed description for category matching",
    "estimated_portion": 250,
    "portion_unit": "grams",
    "confidence": 0.9
  },
  "ingredients": [
    {
      "name": "ingredient name (e.g., nasi putih, telur ayam)",
      "category": "ingredient category (protein, carbs, vegetables, etc)",
      "estimated_portion": 150,
      "portion_unit": "grams",
      "confidence": 0.8
    }
  ],
  "image_quality": "good|fair|poor",
  "additional_notes": "any relevant observations"
}"#;

/// First-pass instruction sent alongside the image.
pub fn analysis_prompt() -> String {
    format!(
        "Analyze this food image and provide detailed information in JSON format.\n\
         \n\
         Instructions:\n\
         - Identify the main food dish (e.g., \"Nasi Goreng\", \"Pizza Margherita\", \"Chicken Curry\")\n\
         - Provide a description of the dish for category matching\n\
         - List all ingredient components (e.g., for nasi goreng: rice, egg, vegetables, soy sauce)\n\
         - Estimate portion sizes in common units (grams, cups, tablespoons, teaspoons, pieces, slices, ounces, milliliters)\n\
         - Provide confidence scores (0-1) for each identification\n\
         \n\
         Required JSON format:\n\
         {RESPONSE_SCHEMA}\n\
         \n\
         Respond with the JSON object only.\n\
         Image context: User uploaded this food image for diet tracking purposes."
    )
}

/// Second-pass instruction carrying the previous result as context.
pub fn reanalysis_prompt(previous: &VisionResult) -> String {
    format!(
        "Re-analyze this food image with focus on uncertain items.\n\
         Previous analysis result:\n\
         {previous}\n\
         \n\
         Please:\n\
         1. Verify or correct previous identifications\n\
         2. Look for missed food items\n\
         3. Refine portion estimates\n\
         4. Provide alternative identifications if uncertain\n\
         \n\
         Use the same JSON format as before:\n\
         {RESPONSE_SCHEMA}",
        previous = previous.to_wire()
    )
}
